//! Conduit discovery
//!
//! Fires an ICMP probe at every usable address in the target network to
//! populate the kernel's neighbor table, then reads the table back and
//! keeps the entries carrying MultiTech's OUI. The result is deduplicated
//! by MAC and sorted, so every later phase processes gateways in the same
//! order on every run.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;

use mp_core::constants::{ARP_SETTLE_SECS, MULTITECH_OUI};
use mp_core::MacAddr;

use crate::error::EngineError;

/// Identity of one discovered gateway, before any SSH contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGateway {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// OS-level facilities discovery needs: a probe sweep and the neighbor
/// table. Injectable so the parsing and ordering logic is testable
/// without a network.
#[async_trait]
pub trait NeighborProbe: Send + Sync {
    /// Probe every host so the kernel learns their hardware addresses.
    /// Individual non-responders are not errors; only a sweep that cannot
    /// be launched at all is.
    async fn sweep(&self, hosts: &[Ipv4Addr]) -> Result<(), EngineError>;

    /// The raw neighbor table text.
    async fn neighbor_table(&self) -> Result<String, EngineError>;
}

/// Real probe: background `ping -c2 -W1` per host, fixed settle delay,
/// then `/proc/net/arp`.
pub struct SystemProbe {
    settle: Duration,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            settle: Duration::from_secs(ARP_SETTLE_SECS),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NeighborProbe for SystemProbe {
    async fn sweep(&self, hosts: &[Ipv4Addr]) -> Result<(), EngineError> {
        let mut launched = 0usize;
        let mut last_error = None;

        for host in hosts {
            let spawned = tokio::process::Command::new("ping")
                .args(["-c2", "-W1", &host.to_string()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            match spawned {
                Ok(mut child) => {
                    launched += 1;
                    // let the probes race in the background; we only need
                    // the ARP side effect
                    tokio::spawn(async move {
                        let _ = child.wait().await;
                    });
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        if launched == 0 {
            return Err(EngineError::Probe(
                last_error.unwrap_or_else(|| "no hosts to probe".to_string()),
            ));
        }

        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn neighbor_table(&self) -> Result<String, EngineError> {
        tokio::fs::read_to_string("/proc/net/arp")
            .await
            .map_err(|e| EngineError::NeighborTable(e.to_string()))
    }
}

/// Sweep the network and return the MultiTech gateways found, dedup'd by
/// MAC (first IP wins) and sorted ascending by canonical MAC.
pub async fn discover(
    network: Ipv4Net,
    probe: &dyn NeighborProbe,
) -> Result<Vec<DiscoveredGateway>, EngineError> {
    let hosts: Vec<Ipv4Addr> = network.hosts().collect();
    tracing::debug!(network = %network, hosts = hosts.len(), "starting probe sweep");
    probe.sweep(&hosts).await?;

    let table = probe.neighbor_table().await?;
    Ok(parse_neighbor_table(&table))
}

/// Pull `ip hw-address` pairs out of neighbor-table text, keeping only
/// MultiTech entries. Lines that do not parse (headers, incomplete
/// entries) are skipped.
fn parse_neighbor_table(table: &str) -> Vec<DiscoveredGateway> {
    let mut seen: HashSet<MacAddr> = HashSet::new();
    let mut found = Vec::new();

    for line in table.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let Ok(ip) = fields[0].parse::<Ipv4Addr>() else {
            continue;
        };
        let Ok(mac) = MacAddr::parse(fields[3]) else {
            continue;
        };
        if !mac.has_vendor_prefix(MULTITECH_OUI) {
            continue;
        }
        if !seen.insert(mac.clone()) {
            tracing::info!(%mac, %ip, "duplicate MAC in neighbor table, keeping first");
            continue;
        }
        found.push(DiscoveredGateway { ip, mac });
    }

    found.sort_by(|a, b| a.mac.cmp(&b.mac));
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
10.0.0.5         0x1         0x2         00:08:00:4a:2b:10     *        eth0
10.0.0.3         0x1         0x2         00:08:00:4a:2b:02     *        eth0
10.0.0.9         0x1         0x2         d8:3a:dd:11:22:33     *        eth0
10.0.0.7         0x1         0x0         00:00:00:00:00:00     *        eth0
";

    #[test]
    fn test_parse_filters_and_sorts() {
        let found = parse_neighbor_table(ARP);
        assert_eq!(found.len(), 2);
        // sorted by MAC, not by table order
        assert_eq!(found[0].mac.as_str(), "00-08-00-4a-2b-02");
        assert_eq!(found[0].ip, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(found[1].mac.as_str(), "00-08-00-4a-2b-10");
    }

    #[test]
    fn test_duplicate_mac_keeps_first_ip() {
        let table = "\
10.0.0.4  0x1  0x2  00:08:00:aa:bb:cc  *  eth0
10.0.0.8  0x1  0x2  00:08:00:aa:bb:cc  *  eth0
";
        let found = parse_neighbor_table(table);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ip, Ipv4Addr::new(10, 0, 0, 4));
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let table = "junk\n\n10.0.0.1 incomplete\nnot-an-ip 0x1 0x2 00:08:00:01:02:03 * eth0\n";
        assert!(parse_neighbor_table(table).is_empty());
    }

    #[tokio::test]
    async fn test_discover_uses_probe() {
        struct Fake;
        #[async_trait]
        impl NeighborProbe for Fake {
            async fn sweep(&self, hosts: &[Ipv4Addr]) -> Result<(), EngineError> {
                // /29 has 6 usable hosts
                assert_eq!(hosts.len(), 6);
                Ok(())
            }
            async fn neighbor_table(&self) -> Result<String, EngineError> {
                Ok(ARP.to_string())
            }
        }

        let network: Ipv4Net = "10.0.0.0/29".parse().unwrap();
        let found = discover(network, &Fake).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_discover_propagates_table_failure() {
        struct Broken;
        #[async_trait]
        impl NeighborProbe for Broken {
            async fn sweep(&self, _hosts: &[Ipv4Addr]) -> Result<(), EngineError> {
                Ok(())
            }
            async fn neighbor_table(&self) -> Result<String, EngineError> {
                Err(EngineError::NeighborTable("no such file".to_string()))
            }
        }

        let network: Ipv4Net = "10.0.0.0/29".parse().unwrap();
        assert!(matches!(
            discover(network, &Broken).await,
            Err(EngineError::NeighborTable(_))
        ));
    }
}
