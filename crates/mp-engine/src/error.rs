//! Engine error types
//!
//! Two channels, deliberately: expected remote failures (host unreachable,
//! command exited nonzero) are booleans or `None` on the operation that
//! hit them, and never appear here. `EngineError` is reserved for
//! conditions that must stop the run: bad operator input, invariant
//! violations, and fleet-wide gates.

use mp_core::{MacAddr, SettingsError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The organization tag from the command line is not in settings
    #[error("Unknown organization: {0}")]
    UnknownOrganization(String),

    /// A live gateway reported a product id with no settings entry.
    /// This is a configuration gap, not a transient condition.
    #[error("{mac}: unknown product id: {product_id}")]
    UnknownProductId { mac: MacAddr, product_id: String },

    /// A gateway's jumphost UID was assigned twice with different values
    #[error("{mac}: {jumphost}: can't change jumphost uid from {current} to {desired}")]
    UidConflict {
        mac: MacAddr,
        jumphost: String,
        current: u32,
        desired: u32,
    },

    /// Settings record inconsistency discovered after load
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fleet-wide gate: the jumphost must answer before any gateway is touched
    #[error("Jumphost {0} is not reachable over ssh")]
    JumphostUnreachable(String),

    /// Fleet-wide gate: discovery found nothing to provision
    #[error("No conduits found on {0}")]
    NoConduitsFound(String),

    /// Fleet-wide gate: every discovered conduit was dropped as unreachable
    #[error("No conduits remain after removing unreachable hosts")]
    NoReachableConduits,

    /// The ping sweep could not be launched at all
    #[error("Network probe failed: {0}")]
    Probe(String),

    /// The neighbor table could not be read
    #[error("Neighbor table read failed: {0}")]
    NeighborTable(String),

    /// Settings load/validation error
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
