use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vlanctl::dhcp::ClientPreference;
use vlanctl::{Invocation, Mode, VlanError, VlanctlConfig};

/// Provision 802.1Q VLAN subinterfaces from a definitions file
#[derive(Parser)]
#[command(name = "vlanctl", author, version, about)]
struct Cli {
    /// Parent interface the VLANs are stacked on
    #[arg(short, long)]
    interface: Option<String>,

    /// Definitions file (`<vlan_id> <ip>/<prefix>`, `<vlan_id> <ip> <prefix>`, `<vlan_id> dhcp|dhcp6`)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Only remove existing VLAN subinterfaces
    #[arg(long)]
    reset: bool,

    /// Show current VLAN subinterfaces and exit
    #[arg(long)]
    show: bool,

    /// Print intended actions without changing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// DHCP client to use: auto, dhclient, dhcpcd or udhcpc
    #[arg(long)]
    dhcp_client: Option<String>,

    /// Print --show output as JSON
    #[arg(long)]
    json: bool,

    /// JSON file with tool defaults
    #[arg(long, env = "VLANCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")
}

fn resolve(cli: Cli) -> Result<Invocation> {
    // Conflicting modes are rejected before any config or system access
    let mode = Mode::from_flags(cli.reset, cli.show)?;

    let config = VlanctlConfig::load(cli.config.as_deref())?;
    let dhcp_client = match cli.dhcp_client.as_deref() {
        Some(name) => name.parse::<ClientPreference>()?,
        None => config.dhcp_client,
    };

    Ok(Invocation {
        mode,
        parent: cli.interface.unwrap_or_else(|| config.default_parent.clone()),
        definitions: cli.file.unwrap_or_else(|| config.definitions.clone()),
        dry_run: cli.dry_run,
        json: cli.json,
        dhcp_client,
        config,
    })
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<VlanError>()
        .map(VlanError::exit_code)
        .unwrap_or(1)
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(cli.verbose) {
        eprintln!("vlanctl: {:#}", err);
    }

    let outcome = resolve(cli).and_then(|invocation| {
        debug!("Resolved invocation: {:?}", invocation);
        vlanctl::run(invocation)
    });

    if let Err(err) = outcome {
        eprintln!("vlanctl: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}
