//! The mass-provision engine
//!
//! Orchestrates one provisioning run: discover Conduits from ARP data,
//! interrogate each over SSH, reconcile each gateway's account in the
//! jumphost's user namespace, and install the reverse-SSH tunnel service.
//!
//! Module map, leaf first:
//! - [`discovery`] — ping sweep + neighbor table parse, deterministic
//!   gateway list.
//! - [`conduit`] — one discovered gateway and its fetch/derive operations.
//! - [`jumphost`] — the jumphost's group/user namespace allocator.
//! - [`tunnel`] — the ordered, fail-fast tunnel installation sequence.
//! - [`driver`] — end-to-end phase sequencing and failure aggregation.

pub mod conduit;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod jumphost;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod testing;

pub use conduit::Conduit;
pub use driver::{RunConfig, RunReport, RunnerFactory};
pub use error::EngineError;
pub use jumphost::Jumphost;
