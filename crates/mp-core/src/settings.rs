//! Settings file schema
//!
//! The settings file describes everything the operator knows ahead of the
//! run: the product catalog, the organizations, the jumphosts, the fleet's
//! standard authorized keys, and the tunnel service script to install on
//! each gateway. It is parsed and cross-validated once; after that the
//! records are immutable values passed by reference.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::SettingsError;

/// Capability attributes for one MultiTech product id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductAttributes {
    /// Hardware family, e.g. "mtcdt"
    pub device_type: String,
    /// LoRaWAN device class
    pub device_class: String,
    /// Whether the product carries a cellular modem
    #[serde(default)]
    pub has_cellular: bool,
}

/// One organization: a named grouping of gateways and the jumphost(s)
/// they provision through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Human-readable description
    pub description: String,
    /// Hostname prefix for gateways in this organization
    pub prefix: String,
    /// Organization tag
    pub id: String,
    /// OS group on the jumphost that gateway accounts join
    pub gateway_group: String,
    /// Jumphost tags this organization provisions through.
    /// Exactly one is supported; see [`Settings::load`].
    pub jumphosts: Vec<String>,
}

/// Connection identity and allocation ranges for one jumphost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumphostAttributes {
    /// Human-readable description
    pub description: String,
    /// Username used when logging in
    pub username: String,
    /// Hostname of the jumphost
    pub hostname: String,
    /// SSH port
    pub port: u16,
    /// First UID to assign for gateway accounts on this jumphost
    pub first_uid: u32,
    /// First keepalive port to assign for gateway tunnels
    pub first_keepalive: u16,
}

/// The whole settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Product id -> capability attributes
    pub product_id_map: HashMap<String, ProductAttributes>,
    /// Organization tag -> organization
    pub organizations: HashMap<String, Organization>,
    /// Jumphost tag -> jumphost attributes
    pub jumphosts: HashMap<String, JumphostAttributes>,
    /// Fleet-wide public keys appended to every gateway's authorized_keys
    #[serde(default)]
    pub gateway_root_public_keys: Vec<String>,
    /// Lines of the /etc/init.d/ssh_tunnel service script
    #[serde(default)]
    pub ssh_tunnel_script: Vec<String>,
}

impl Settings {
    /// Load and validate settings from a TOML file.
    ///
    /// Validation checks cross-references only; unknown product ids are
    /// caught later, when a live gateway reports one.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (tag, org) in &self.organizations {
            if org.jumphosts.is_empty() {
                return Err(SettingsError::NoJumphosts(tag.clone()));
            }
            // UID reconciliation across several jumphosts is unsupported;
            // reject it up front rather than half-provisioning.
            if org.jumphosts.len() > 1 {
                return Err(SettingsError::MultipleJumphosts {
                    org: tag.clone(),
                    count: org.jumphosts.len(),
                });
            }
            for jh in &org.jumphosts {
                if !self.jumphosts.contains_key(jh) {
                    return Err(SettingsError::UnknownJumphostTag {
                        org: tag.clone(),
                        tag: jh.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up an organization by tag.
    pub fn organization(&self, tag: &str) -> Option<&Organization> {
        self.organizations.get(tag)
    }

    /// The single jumphost an organization provisions through.
    ///
    /// Always present for a validated settings file.
    pub fn jumphost_for(&self, org: &Organization) -> Option<&JumphostAttributes> {
        org.jumphosts.first().and_then(|tag| self.jumphosts.get(tag))
    }
}
