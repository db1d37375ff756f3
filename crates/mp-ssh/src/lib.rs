//! Remote command transport for mass-provision
//!
//! Exposes the [`CommandRunner`] trait the engine drives, plus the
//! russh-backed [`SshConnector`] that implements it for real hosts.

mod command;
mod session;

pub use command::{CommandOutput, CommandRunner, SshError};
pub use session::{Auth, SshConnector};
