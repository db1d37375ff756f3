//! End-to-end orchestration of one provisioning run
//!
//! Phases run strictly in order, and within each phase gateways are
//! processed in MAC-sorted order, so UID allocation on the jumphost is
//! reproducible run to run. Per-gateway failures are aggregated, not
//! fatal; only fleet-wide gates (jumphost unreachable, nothing
//! discovered) and operator-input errors abort the run.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use serde::Serialize;

use mp_core::settings::{JumphostAttributes, Settings};
use mp_core::MacAddr;
use mp_ssh::CommandRunner;

use crate::conduit::Conduit;
use crate::discovery::{self, NeighborProbe};
use crate::error::EngineError;
use crate::jumphost::Jumphost;
use crate::tunnel;

/// Per-run parameters distilled from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Network segment holding the Conduits
    pub network: Ipv4Net,
    /// Organization tag to provision for
    pub org: String,
    /// Drop SSH-unreachable gateways from the working set instead of
    /// failing the run (fails anyway if none survive)
    pub skip_unreachable: bool,
}

/// Builds command runners for the hosts the engine decides to talk to.
/// The CLI supplies real SSH connectors; tests supply scripted ones.
pub trait RunnerFactory: Send + Sync {
    fn conduit_runner(&self, ip: Ipv4Addr) -> Arc<dyn CommandRunner>;
    fn jumphost_runner(&self, attrs: &JumphostAttributes) -> Arc<dyn CommandRunner>;
}

/// Which phase a gateway failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reachability,
    Inventory,
    Allocation,
    Tunnel,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Reachability => "reachability",
            Phase::Inventory => "inventory",
            Phase::Allocation => "allocation",
            Phase::Tunnel => "tunnel",
        };
        write!(f, "{}", name)
    }
}

/// One gateway's outcome.
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySummary {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub product_id: Option<String>,
    pub lora_eui64: Option<String>,
    pub jumphost_uid: Option<u32>,
    pub provisioned: bool,
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayFailure {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub phase: Phase,
    pub detail: String,
}

/// Aggregated result of the whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub gateways: Vec<GatewaySummary>,
    pub failures: Vec<GatewayFailure>,
    pub skipped_unreachable: Vec<MacAddr>,
}

impl RunReport {
    /// True iff every gateway that stayed in the working set was fully
    /// provisioned.
    pub fn ok(&self) -> bool {
        self.failures.is_empty() && self.gateways.iter().all(|g| g.provisioned)
    }
}

/// Run the whole provisioning sequence.
pub async fn run(
    cfg: &RunConfig,
    settings: &Settings,
    factory: &dyn RunnerFactory,
    probe: &dyn NeighborProbe,
) -> Result<RunReport, EngineError> {
    let org = settings
        .organization(&cfg.org)
        .ok_or_else(|| EngineError::UnknownOrganization(cfg.org.clone()))?;
    let jh_attrs = settings
        .jumphost_for(org)
        .ok_or_else(|| EngineError::Config(format!("organization {} has no jumphost", org.id)))?;

    // fleet-wide gate: nothing is touched until the jumphost answers
    let jumphost = Jumphost::new(jh_attrs.clone(), factory.jumphost_runner(jh_attrs));
    if !jumphost.is_reachable().await {
        return Err(EngineError::JumphostUnreachable(jh_attrs.hostname.clone()));
    }
    tracing::info!(jumphost = %jh_attrs.hostname, "jumphost reachable");

    // discovery: fleet-wide gate if nothing is found
    let found = discovery::discover(cfg.network, probe).await?;
    if found.is_empty() {
        return Err(EngineError::NoConduitsFound(cfg.network.to_string()));
    }
    tracing::info!(count = found.len(), "conduits discovered");

    let mut conduits: Vec<Conduit> = found
        .into_iter()
        .map(|gw| Conduit::new(gw.ip, gw.mac, factory.conduit_runner(gw.ip)))
        .collect();

    let mut failures: Vec<GatewayFailure> = Vec::new();
    let mut skipped: Vec<MacAddr> = Vec::new();

    // reachability phase
    let mut working = Vec::with_capacity(conduits.len());
    for conduit in conduits.drain(..) {
        if conduit.check_ssh_reachable().await {
            working.push(conduit);
        } else if cfg.skip_unreachable {
            tracing::info!(mac = %conduit.mac, ip = %conduit.ip, "skipping unreachable conduit");
            skipped.push(conduit.mac.clone());
        } else {
            failures.push(GatewayFailure {
                mac: conduit.mac.clone(),
                ip: conduit.ip,
                phase: Phase::Reachability,
                detail: "ssh unreachable".to_string(),
            });
        }
    }
    if working.is_empty() {
        return Err(EngineError::NoReachableConduits);
    }

    // inventory phase: fetch and derive everything the later phases need
    let mut inventoried = Vec::with_capacity(working.len());
    for mut conduit in working.drain(..) {
        if !conduit.fetch_product_id().await {
            failures.push(fail(&conduit, Phase::Inventory, "product id query failed"));
            continue;
        }
        // an unknown product id is an operator data gap: fatal
        conduit.resolve_product_attributes(&settings.product_id_map)?;
        conduit.derive_hostname(&org.prefix);
        conduit.derive_friendly_name(org);
        if !conduit.fetch_public_host_key().await {
            failures.push(fail(&conduit, Phase::Inventory, "host key fetch failed"));
            continue;
        }
        if !conduit.fetch_lora_eui64().await {
            failures.push(fail(&conduit, Phase::Inventory, "lora eui64 fetch failed"));
            continue;
        }
        inventoried.push(conduit);
    }

    // allocation phase: serialized against the one jumphost
    if !jumphost.ensure_group(&org.gateway_group).await {
        tracing::error!(group = %org.gateway_group, "gateway group could not be ensured");
    }
    let mut allocated = Vec::with_capacity(inventoried.len());
    for mut conduit in inventoried.drain(..) {
        let hostname = conduit
            .hostname
            .clone()
            .unwrap_or_else(|| conduit.mac.to_string());
        let friendly = conduit
            .friendly_name
            .clone()
            .unwrap_or_else(|| conduit.mac.to_string());

        let uid = jumphost
            .create_or_reconcile_user(
                conduit.jumphost_uid(&jumphost),
                &friendly,
                &hostname,
                &org.gateway_group,
            )
            .await;
        let Some(uid) = uid else {
            failures.push(fail(
                &conduit,
                Phase::Allocation,
                "user creation or reconciliation failed",
            ));
            continue;
        };
        conduit.set_jumphost_uid(&jumphost, uid)?;

        let keys: Vec<String> = conduit.public_key.iter().cloned().collect();
        if !jumphost
            .ensure_ssh_authorization(&keys, &hostname, &org.gateway_group)
            .await
        {
            failures.push(fail(&conduit, Phase::Allocation, "ssh authorization failed"));
            continue;
        }
        allocated.push(conduit);
    }

    // tunnel phase
    let mut summaries = Vec::with_capacity(allocated.len());
    for conduit in &allocated {
        let provisioned = tunnel::provision_tunnel(
            conduit,
            &jumphost,
            &settings.gateway_root_public_keys,
            &settings.ssh_tunnel_script,
        )
        .await;
        if !provisioned {
            failures.push(fail(conduit, Phase::Tunnel, "tunnel setup failed"));
        }
        summaries.push(GatewaySummary {
            mac: conduit.mac.clone(),
            ip: conduit.ip,
            hostname: conduit.hostname.clone(),
            product_id: conduit.product_id.clone(),
            lora_eui64: conduit.lora_eui64.clone(),
            jumphost_uid: conduit.jumphost_uid(&jumphost),
            provisioned,
        });
    }

    // summary logging: successes at info, failures enumerated at error
    for summary in summaries.iter().filter(|s| s.provisioned) {
        tracing::info!(
            mac = %summary.mac,
            ip = %summary.ip,
            hostname = summary.hostname.as_deref().unwrap_or("-"),
            uid = ?summary.jumphost_uid,
            "provisioned"
        );
    }
    if !failures.is_empty() {
        tracing::error!(count = failures.len(), "gateways failed");
        for failure in &failures {
            tracing::error!(
                mac = %failure.mac,
                ip = %failure.ip,
                phase = %failure.phase,
                detail = %failure.detail,
                "gateway failed"
            );
        }
    }

    Ok(RunReport {
        gateways: summaries,
        failures,
        skipped_unreachable: skipped,
    })
}

fn fail(conduit: &Conduit, phase: Phase, detail: &str) -> GatewayFailure {
    GatewayFailure {
        mac: conduit.mac.clone(),
        ip: conduit.ip,
        phase,
        detail: detail.to_string(),
    }
}
