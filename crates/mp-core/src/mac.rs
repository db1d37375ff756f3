//! Canonical MAC address handling
//!
//! A Conduit's MAC address is its primary identity for the whole run: it
//! keys deduplication, drives the deterministic processing order, and is
//! embedded in the derived hostname. The canonical form is lowercase hex
//! octets joined by `-` (the form that is safe inside a hostname).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SettingsError;

/// A hardware address in canonical form: `aa-bb-cc-dd-ee-ff`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacAddr(String);

impl MacAddr {
    /// Parse a MAC address from colon- or hyphen-separated hex octets,
    /// case-insensitive. The result is always canonical, so parsing an
    /// already-canonical string is a no-op.
    pub fn parse(s: &str) -> Result<Self, SettingsError> {
        let octets: Vec<&str> = s.split([':', '-']).collect();
        if octets.len() != 6 {
            return Err(SettingsError::InvalidMac(s.to_string()));
        }
        for octet in &octets {
            if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(SettingsError::InvalidMac(s.to_string()));
            }
        }
        Ok(Self(octets.join("-").to_ascii_lowercase()))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this address carries the given OUI prefix (canonical form,
    /// e.g. `00-08-00`).
    pub fn has_vendor_prefix(&self, oui: &str) -> bool {
        self.0.starts_with(oui)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
