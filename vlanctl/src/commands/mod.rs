use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{load_definitions, VlanctlConfig};
use crate::dhcp::{AddressAcquirer, ClientPreference, DhcpAcquirer};
use crate::error::VlanError;
use crate::inspect::{render_json, render_text, Inspector};
use crate::link::{IpLinkManager, LinkManager};
use crate::reconcile::VlanReconciler;
use crate::types::ApplyReport;

/// What a single invocation does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Converge the parent onto the definitions file
    Apply,
    /// Tear down every VLAN device on the parent
    Reset,
    /// Print the live VLAN devices on the parent
    Show,
}

impl Mode {
    /// Resolve the mode from command-line flags before anything touches the system
    pub fn from_flags(reset: bool, show: bool) -> std::result::Result<Self, VlanError> {
        match (reset, show) {
            (true, true) => Err(VlanError::Usage(
                "--reset and --show cannot be used together".to_string(),
            )),
            (true, false) => Ok(Mode::Reset),
            (false, true) => Ok(Mode::Show),
            (false, false) => Ok(Mode::Apply),
        }
    }

    /// Whether running this mode for real changes system state
    pub fn mutates(self) -> bool {
        !matches!(self, Mode::Show)
    }
}

/// Fully resolved invocation, after config file and flags are merged
#[derive(Debug, Clone)]
pub struct Invocation {
    pub mode: Mode,
    /// Parent interface the VLANs are stacked on
    pub parent: String,
    /// Desired-state file read in apply mode
    pub definitions: PathBuf,
    /// Report actions without changing anything
    pub dry_run: bool,
    /// Render `--show` output as JSON
    pub json: bool,
    /// DHCP client to lease with
    pub dhcp_client: ClientPreference,
    /// Tool defaults the other fields were resolved against
    pub config: VlanctlConfig,
}

/// Fail unless the effective user is root
pub fn require_root() -> std::result::Result<(), VlanError> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(VlanError::InsufficientPrivilege)
    }
}

/// Parse `definitions` and converge `parent` onto it
pub fn run_apply<L, A>(
    links: L,
    dhcp: A,
    parent: &str,
    definitions: &Path,
    dry_run: bool,
) -> Result<ApplyReport>
where
    L: LinkManager,
    A: AddressAcquirer,
{
    // Parse everything up front so a bad line aborts before any mutation
    let entries = load_definitions(definitions)?;
    info!(
        "Applying {} entries from {} to {}",
        entries.len(),
        definitions.display(),
        parent
    );

    let reconciler = VlanReconciler::new(links, dhcp, dry_run);
    let report = reconciler
        .apply(parent, &entries)
        .with_context(|| format!("Failed to apply VLAN definitions to {}", parent))?;

    Ok(report)
}

/// Remove all VLAN devices from `parent`
pub fn run_reset<L, A>(links: L, dhcp: A, parent: &str, dry_run: bool) -> Result<ApplyReport>
where
    L: LinkManager,
    A: AddressAcquirer,
{
    let reconciler = VlanReconciler::new(links, dhcp, dry_run);
    let report = reconciler
        .reset(parent)
        .with_context(|| format!("Failed to reset VLANs on {}", parent))?;

    if report.actions.is_empty() {
        info!("No VLAN subinterfaces to remove on {}", parent);
    }

    Ok(report)
}

/// Render the live VLAN devices on `parent` as output lines
pub fn run_show<L: LinkManager>(links: L, parent: &str, json: bool) -> Result<Vec<String>> {
    let outcome = Inspector::new(links)
        .list(parent)
        .with_context(|| format!("Failed to inspect VLANs on {}", parent))?;

    if json {
        let rendered = render_json(&outcome).context("Failed to serialize VLAN list")?;
        Ok(vec![rendered])
    } else {
        Ok(render_text(parent, &outcome))
    }
}

/// Main entry point: wire the real link manager and DHCP clients and run
pub fn run(invocation: Invocation) -> Result<()> {
    let Invocation {
        mode,
        parent,
        definitions,
        dry_run,
        json,
        dhcp_client,
        config,
    } = invocation;

    if mode == Mode::Show && dry_run {
        warn!("--dry-run has no effect with --show");
    }

    if mode.mutates() && !dry_run {
        require_root()?;
    }

    let links = IpLinkManager::new(&config.vlan_module);
    let dhcp = DhcpAcquirer::new(dhcp_client, config.dhcp_priority.clone())
        .with_run_dir(&config.run_dir);

    let lines = match mode {
        Mode::Apply => run_apply(&links, &dhcp, &parent, &definitions, dry_run)?.lines(),
        Mode::Reset => run_reset(&links, &dhcp, &parent, dry_run)?.lines(),
        Mode::Show => run_show(&links, &parent, json)?,
    };

    for line in lines {
        println!("{}", line);
    }

    Ok(())
}
