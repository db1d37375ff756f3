//! One Conduit being provisioned
//!
//! Holds the identity discovered from ARP (ip, mac), the attributes
//! fetched over SSH, and the names derived from them. Fetch operations
//! return plain booleans: a false means the remote command failed or
//! produced nothing usable, and the driver records it against this
//! gateway without stopping the fleet.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use mp_core::constants::HOST_PUBKEY_PATH;
use mp_core::settings::{Organization, ProductAttributes};
use mp_core::MacAddr;
use mp_ssh::CommandRunner;

use crate::error::EngineError;
use crate::jumphost::Jumphost;

pub struct Conduit {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    runner: Arc<dyn CommandRunner>,

    pub product_id: Option<String>,
    pub product_attributes: Option<ProductAttributes>,
    pub hostname: Option<String>,
    pub friendly_name: Option<String>,
    pub public_key: Option<String>,
    pub lora_eui64: Option<String>,

    // one UID per gateway; see jumphost_uid()
    jumphost_uid: Option<u32>,
}

impl Conduit {
    pub fn new(ip: Ipv4Addr, mac: MacAddr, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ip,
            mac,
            runner,
            product_id: None,
            product_attributes: None,
            hostname: None,
            friendly_name: None,
            public_key: None,
            lora_eui64: None,
            jumphost_uid: None,
        }
    }

    pub(crate) fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// True iff a no-op command completes over SSH.
    pub async fn check_ssh_reachable(&self) -> bool {
        let up = self.runner.ping().await;
        if up {
            tracing::info!(mac = %self.mac, ip = %self.ip, "ssh is working");
        } else {
            tracing::info!(mac = %self.mac, ip = %self.ip, "ssh is not working");
        }
        up
    }

    /// Query the device inventory for its product id.
    pub async fn fetch_product_id(&mut self) -> bool {
        let result = self.runner.run("mts-io-sysfs show product-id").await;
        let Ok(output) = result else {
            return false;
        };
        if !output.ok() {
            tracing::debug!(mac = %self.mac, stderr = %output.stderr, "product-id query failed");
            return false;
        }
        let Some(product_id) = output.first_line() else {
            return false;
        };
        tracing::info!(mac = %self.mac, product_id, "product id");
        self.product_id = Some(product_id.to_string());
        true
    }

    /// Resolve the fetched product id against the settings catalog.
    ///
    /// An unknown id is fatal for the whole run: it means the catalog is
    /// missing an entry, and every gateway of that model would fail the
    /// same way.
    pub fn resolve_product_attributes(
        &mut self,
        product_id_map: &HashMap<String, ProductAttributes>,
    ) -> Result<(), EngineError> {
        let product_id = self.product_id.clone().unwrap_or_default();
        match product_id_map.get(&product_id) {
            Some(attrs) => {
                self.product_attributes = Some(attrs.clone());
                Ok(())
            }
            None => Err(EngineError::UnknownProductId {
                mac: self.mac.clone(),
                product_id,
            }),
        }
    }

    /// Derive the gateway's hostname: organization prefix + canonical MAC.
    pub fn derive_hostname(&mut self, prefix: &str) {
        let hostname = format!("{}{}", prefix, self.mac);
        tracing::debug!(mac = %self.mac, hostname, "hostname derived");
        self.hostname = Some(hostname);
    }

    /// Derive the short human-readable description.
    pub fn derive_friendly_name(&mut self, _org: &Organization) {
        let name = format!(
            "Multitech {} {}",
            self.product_id.as_deref().unwrap_or("unknown"),
            self.mac
        );
        tracing::debug!(mac = %self.mac, friendly_name = %name, "friendly name derived");
        self.friendly_name = Some(name);
    }

    /// Read the gateway's RSA host public key.
    pub async fn fetch_public_host_key(&mut self) -> bool {
        let command = format!("cat {}", HOST_PUBKEY_PATH);
        let Ok(output) = self.runner.run(&command).await else {
            return false;
        };
        if !output.ok() {
            return false;
        }
        let Some(key) = output.first_line() else {
            return false;
        };
        tracing::info!(mac = %self.mac, "fetched gateway host public key");
        self.public_key = Some(key.to_string());
        true
    }

    /// Read the LoRa radio's EUI-64, normalized to lowercase.
    pub async fn fetch_lora_eui64(&mut self) -> bool {
        let Ok(output) = self.runner.run("mts-io-sysfs show lora/eui").await else {
            return false;
        };
        if !output.ok() {
            return false;
        }
        let Some(eui) = output.first_line() else {
            return false;
        };
        let eui = eui.to_ascii_lowercase();
        tracing::info!(mac = %self.mac, lora_eui64 = %eui, "fetched LoRa EUI-64");
        self.lora_eui64 = Some(eui);
        true
    }

    /// The UID assigned on the given jumphost.
    ///
    /// The model nominally supports several jumphosts per gateway, but
    /// distinct per-jumphost UIDs are unsupported; one value is shared.
    pub fn jumphost_uid(&self, _jumphost: &Jumphost) -> Option<u32> {
        self.jumphost_uid
    }

    /// Record the UID assigned on a jumphost. Assigning a different value
    /// than one already recorded is an invariant violation and aborts the
    /// run.
    pub fn set_jumphost_uid(&mut self, jumphost: &Jumphost, uid: u32) -> Result<(), EngineError> {
        match self.jumphost_uid {
            None => {
                self.jumphost_uid = Some(uid);
                Ok(())
            }
            Some(current) if current == uid => Ok(()),
            Some(current) => Err(EngineError::UidConflict {
                mac: self.mac.clone(),
                jumphost: jumphost.hostname().to_string(),
                current,
                desired: uid,
            }),
        }
    }

    /// The reverse-tunnel port on the jumphost: the UID itself.
    pub fn reverse_port(&self, jumphost: &Jumphost) -> Option<u32> {
        self.jumphost_uid(jumphost)
    }

    /// The keepalive monitor port, derived from the UID and the
    /// jumphost's allocation bases.
    ///
    /// A UID below the jumphost's floor (a manually created account
    /// adopted during reconciliation) has no keepalive slot; that is a
    /// per-gateway failure, not a panic.
    pub fn keepalive_port(&self, jumphost: &Jumphost) -> Option<u32> {
        let uid = self.jumphost_uid(jumphost)?;
        let Some(offset) = uid.checked_sub(jumphost.first_uid()) else {
            tracing::error!(
                mac = %self.mac,
                uid,
                first_uid = jumphost.first_uid(),
                "uid is below the jumphost allocation floor, no keepalive port"
            );
            return None;
        };
        Some(offset * 2 + u32::from(jumphost.first_keepalive()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use mp_core::settings::JumphostAttributes;
    use mp_ssh::CommandOutput;

    fn mac() -> MacAddr {
        MacAddr::parse("00:08:00:4a:2b:1c").unwrap()
    }

    fn conduit(runner: ScriptedRunner) -> Conduit {
        Conduit::new(Ipv4Addr::new(192, 168, 12, 10), mac(), Arc::new(runner))
    }

    fn jumphost() -> Jumphost {
        Jumphost::new(
            JumphostAttributes {
                description: "test".to_string(),
                username: "provision".to_string(),
                hostname: "jump.example.org".to_string(),
                port: 22,
                first_uid: 20000,
                first_keepalive: 40000,
            },
            Arc::new(ScriptedRunner::new("jump.example.org:22")),
        )
    }

    #[tokio::test]
    async fn test_fetch_product_id() {
        let runner = ScriptedRunner::new("c").on(
            "mts-io-sysfs show product-id",
            CommandOutput::success("MTCDT-247A\n"),
        );
        let mut c = conduit(runner);
        assert!(c.fetch_product_id().await);
        assert_eq!(c.product_id.as_deref(), Some("MTCDT-247A"));
    }

    #[tokio::test]
    async fn test_fetch_product_id_remote_failure() {
        let runner = ScriptedRunner::new("c").on(
            "mts-io-sysfs",
            CommandOutput::failure(1, "mts-io-sysfs: not found"),
        );
        let mut c = conduit(runner);
        assert!(!c.fetch_product_id().await);
        assert!(c.product_id.is_none());
    }

    #[test]
    fn test_resolve_unknown_product_id_is_fatal() {
        let mut c = conduit(ScriptedRunner::new("c"));
        c.product_id = Some("MTXYZ".to_string());
        let map = HashMap::new();
        assert!(matches!(
            c.resolve_product_attributes(&map),
            Err(EngineError::UnknownProductId { .. })
        ));
    }

    #[test]
    fn test_derive_hostname_is_prefix_plus_mac() {
        let mut c = conduit(ScriptedRunner::new("c"));
        c.derive_hostname("ttn-nyc-");
        assert_eq!(
            c.hostname.as_deref(),
            Some("ttn-nyc-00-08-00-4a-2b-1c")
        );
        // recomputing is idempotent
        c.derive_hostname("ttn-nyc-");
        assert_eq!(
            c.hostname.as_deref(),
            Some("ttn-nyc-00-08-00-4a-2b-1c")
        );
    }

    #[tokio::test]
    async fn test_fetch_public_host_key_takes_first_nonblank_line() {
        let runner = ScriptedRunner::new("c").on(
            "cat /etc/ssh/ssh_host_rsa_key.pub",
            CommandOutput::success("\n  ssh-rsa AAAAB3Nza root@mtcdt  \n"),
        );
        let mut c = conduit(runner);
        assert!(c.fetch_public_host_key().await);
        assert_eq!(c.public_key.as_deref(), Some("ssh-rsa AAAAB3Nza root@mtcdt"));
    }

    #[tokio::test]
    async fn test_fetch_lora_eui64_lowercases() {
        let runner = ScriptedRunner::new("c").on(
            "mts-io-sysfs show lora/eui",
            CommandOutput::success("00:80:00:00:A0:0B:0C:0D\n"),
        );
        let mut c = conduit(runner);
        assert!(c.fetch_lora_eui64().await);
        assert_eq!(c.lora_eui64.as_deref(), Some("00:80:00:00:a0:0b:0c:0d"));
    }

    #[test]
    fn test_set_jumphost_uid_conflict() {
        let jh = jumphost();
        let mut c = conduit(ScriptedRunner::new("c"));
        c.set_jumphost_uid(&jh, 20007).unwrap();
        // same value again is fine
        c.set_jumphost_uid(&jh, 20007).unwrap();
        // a different value is an invariant violation
        assert!(matches!(
            c.set_jumphost_uid(&jh, 20008),
            Err(EngineError::UidConflict {
                current: 20007,
                desired: 20008,
                ..
            })
        ));
    }

    #[test]
    fn test_port_derivations() {
        let jh = jumphost();
        let mut c = conduit(ScriptedRunner::new("c"));
        assert_eq!(c.reverse_port(&jh), None);
        c.set_jumphost_uid(&jh, 20007).unwrap();
        assert_eq!(c.reverse_port(&jh), Some(20007));
        assert_eq!(c.keepalive_port(&jh), Some(40014));
    }

    #[test]
    fn test_keepalive_port_needs_uid_at_or_above_floor() {
        let jh = jumphost();
        let mut c = conduit(ScriptedRunner::new("c"));
        // adopted account created by hand, below the 20000 floor
        c.set_jumphost_uid(&jh, 5001).unwrap();
        assert_eq!(c.keepalive_port(&jh), None);
        assert_eq!(c.reverse_port(&jh), Some(5001));

        let mut at_floor = conduit(ScriptedRunner::new("c"));
        at_floor.set_jumphost_uid(&jh, 20000).unwrap();
        assert_eq!(at_floor.keepalive_port(&jh), Some(40000));
    }
}
