use itertools::Itertools;
use tracing::debug;

use crate::error::Result;
use crate::link::LinkManager;
use crate::types::LiveVlanDevice;

/// What `--show` found on a parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowOutcome {
    /// At least one VLAN device, in kernel order
    Devices(Vec<LiveVlanDevice>),
    /// No VLAN devices on the parent
    Empty,
}

/// Read-only view of the VLAN devices on a parent
pub struct Inspector<L> {
    links: L,
}

impl<L: LinkManager> Inspector<L> {
    pub fn new(links: L) -> Self {
        Self { links }
    }

    /// Describe every VLAN device on `parent`
    pub fn list(&self, parent: &str) -> Result<ShowOutcome> {
        let links = self.links.vlan_links(parent)?;
        if links.is_empty() {
            return Ok(ShowOutcome::Empty);
        }

        let mut devices = Vec::with_capacity(links.len());
        for link in links {
            let vlan_id = vlan_id_from_name(parent, &link.name).or(link.kernel_id);
            let (v6, v4): (Vec<_>, Vec<_>) = self
                .links
                .addresses(&link.name)?
                .into_iter()
                .partition(|net| net.is_ipv6());

            debug!("{}: vlan {:?}, {} addresses", link.name, vlan_id, v4.len() + v6.len());
            devices.push(LiveVlanDevice {
                name: link.name,
                vlan_id,
                admin_state: link.admin_state,
                ipv4_addresses: v4.iter().map(ToString::to_string).collect(),
                ipv6_addresses: v6.iter().map(ToString::to_string).collect(),
            });
        }

        Ok(ShowOutcome::Devices(devices))
    }
}

/// Tag encoded in a `<parent>.<id>` name, if the name follows the convention
pub fn vlan_id_from_name(parent: &str, name: &str) -> Option<u16> {
    let suffix = name.strip_prefix(parent)?.strip_prefix('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// One line per device, or a single "none found" line
pub fn render_text(parent: &str, outcome: &ShowOutcome) -> Vec<String> {
    match outcome {
        ShowOutcome::Empty => vec![format!("No VLAN subinterfaces found on {}", parent)],
        ShowOutcome::Devices(devices) => devices
            .iter()
            .map(|d| {
                format!(
                    "{:<16} vlan={:<5} state={:<7} ipv4={} ipv6={}",
                    d.name,
                    d.vlan_id.map_or_else(|| "?".to_string(), |id| id.to_string()),
                    d.admin_state.to_string(),
                    join_or_dash(&d.ipv4_addresses),
                    join_or_dash(&d.ipv6_addresses),
                )
            })
            .collect(),
    }
}

/// JSON array of devices; empty array when nothing was found
pub fn render_json(outcome: &ShowOutcome) -> serde_json::Result<String> {
    let devices: &[LiveVlanDevice] = match outcome {
        ShowOutcome::Devices(devices) => devices,
        ShowOutcome::Empty => &[],
    };
    serde_json::to_string_pretty(devices)
}

fn join_or_dash(addresses: &[String]) -> String {
    if addresses.is_empty() {
        "-".to_string()
    } else {
        addresses.iter().join(",")
    }
}
