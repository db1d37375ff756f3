//! Error types for settings loading and validation

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating the settings file.
///
/// Every variant here means the operator's input data is wrong, so all of
/// them abort the run before any remote host is touched.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Settings file not found
    #[error("Settings file not found: {0}")]
    NotFound(PathBuf),

    /// I/O error reading settings
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Organization references a jumphost tag that is not defined
    #[error("Organization {org}: unknown jumphost tag: {tag}")]
    UnknownJumphostTag { org: String, tag: String },

    /// Organization lists no jumphosts
    #[error("Organization {0}: no jumphosts configured")]
    NoJumphosts(String),

    /// Multi-jumphost UID reconciliation is unsupported
    #[error("Organization {org}: {count} jumphosts configured, exactly 1 is supported")]
    MultipleJumphosts { org: String, count: usize },

    /// Invalid MAC address in settings or discovery data
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),
}
