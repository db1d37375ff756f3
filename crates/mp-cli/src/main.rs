//! mass-provision CLI
//!
//! Discovers factory-fresh MultiTech Conduits on the local segment,
//! interrogates each over SSH, allocates a gateway account on the
//! organization's jumphost, and installs the reverse-SSH tunnel service.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ipnet::Ipv4Net;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mp_core::atomicfile::write_atomic;
use mp_core::constants::{
    DEFAULT_MLINUX_USERNAME, DEFAULT_NETWORK, DEFAULT_ORG, SSH_COMMAND_TIMEOUT_SECS,
    SSH_CONNECT_TIMEOUT_SECS,
};
use mp_core::settings::{JumphostAttributes, Settings};
use mp_engine::discovery::SystemProbe;
use mp_engine::{driver, RunConfig, RunnerFactory};
use mp_ssh::{Auth, CommandRunner, SshConnector};

mod output;
use output::{format_failures, format_report, print_error, print_info, print_success, print_warning};

#[derive(Parser)]
#[command(name = "mass-provision")]
#[command(author, version, about = "Mass provisioning of MultiTech Conduit LoRaWAN gateways")]
struct Cli {
    /// Network segment to sweep for Conduits (CIDR)
    #[arg(short = 'A', long, default_value = DEFAULT_NETWORK)]
    address: Ipv4Net,

    /// Organization to provision the gateways for
    #[arg(short = 'o', long, default_value = DEFAULT_ORG)]
    org: String,

    /// Login on the Conduits
    #[arg(short = 'U', long, default_value = DEFAULT_MLINUX_USERNAME)]
    username: String,

    /// Password on the Conduits (also fed to sudo)
    #[arg(short = 'P', long, env = "MASS_PROVISION_PASSWORD")]
    password: String,

    /// Private key for the jumphost provisioning account
    /// (falls back to the Conduit password when omitted)
    #[arg(short = 'i', long)]
    identity: Option<PathBuf>,

    /// Path to the settings file
    #[arg(short = 's', long, default_value = "settings.toml")]
    settings: PathBuf,

    /// Log every mutating command instead of running it
    #[arg(short = 'n', long, alias = "dry-run")]
    noop: bool,

    /// Drop SSH-unreachable Conduits instead of failing the run
    #[arg(long)]
    skip_unreachable: bool,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

/// Builds real SSH connectors for the hosts the engine targets.
struct SshFactory {
    username: String,
    password: String,
    identity: Option<PathBuf>,
    dry_run: bool,
}

impl RunnerFactory for SshFactory {
    fn conduit_runner(&self, ip: Ipv4Addr) -> Arc<dyn CommandRunner> {
        Arc::new(SshConnector::new(
            ip.to_string(),
            22,
            self.username.clone(),
            Auth::Password(self.password.clone()),
            Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS),
            Duration::from_secs(SSH_COMMAND_TIMEOUT_SECS),
            self.dry_run,
        ))
    }

    fn jumphost_runner(&self, attrs: &JumphostAttributes) -> Arc<dyn CommandRunner> {
        let auth = match &self.identity {
            Some(path) => Auth::KeyFile(path.clone()),
            None => Auth::Password(self.password.clone()),
        };
        Arc::new(SshConnector::new(
            attrs.hostname.clone(),
            attrs.port,
            attrs.username.clone(),
            auth,
            Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS),
            Duration::from_secs(SSH_COMMAND_TIMEOUT_SECS),
            self.dry_run,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.debug, cli.verbose) {
        (true, _) => "debug",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = Settings::load(&cli.settings)
        .with_context(|| format!("Failed to load settings from {:?}", cli.settings))?;

    if cli.noop {
        print_warning("noop mode: mutating commands are logged, not run");
    }

    let factory = SshFactory {
        username: cli.username,
        password: cli.password,
        identity: cli.identity,
        dry_run: cli.noop,
    };
    let probe = SystemProbe::new();
    let config = RunConfig {
        network: cli.address,
        org: cli.org.clone(),
        skip_unreachable: cli.skip_unreachable,
    };

    print_info(&format!(
        "Provisioning {} gateways on {}",
        cli.org, cli.address
    ));

    let report = match driver::run(&config, &settings, &factory, &probe).await {
        Ok(report) => report,
        Err(e) => {
            print_error(&format!("Provisioning run aborted: {}", e));
            return Err(e.into());
        }
    };

    println!("{}", format_report(&report));
    for skipped in &report.skipped_unreachable {
        print_warning(&format!("{}: skipped (ssh unreachable)", skipped));
    }
    for line in format_failures(&report.failures) {
        print_error(&line);
    }

    if let Some(path) = &cli.report {
        let json = serde_json::to_vec_pretty(&report).context("Failed to serialize report")?;
        write_atomic(path, &json)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        print_info(&format!("Report written to {}", path.display()));
    }

    if report.ok() {
        print_success(&format!(
            "{} gateway(s) provisioned",
            report.gateways.len()
        ));
        Ok(())
    } else {
        std::process::exit(1);
    }
}
