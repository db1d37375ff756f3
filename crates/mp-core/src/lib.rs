//! Core types and utilities for mass-provision
//!
//! This crate holds everything the provisioning engine needs that does not
//! talk to the network: the canonical MAC address type, the settings file
//! schema, shell-safe remote command construction, and the atomic local
//! file writer.

pub mod atomicfile;
pub mod constants;
pub mod error;
pub mod mac;
pub mod settings;
pub mod shell;

pub use error::SettingsError;
pub use mac::MacAddr;
pub use settings::{JumphostAttributes, Organization, ProductAttributes, Settings};
pub use shell::RemoteCommand;
