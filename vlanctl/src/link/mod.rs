use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, VlanError};
use crate::types::{AdminState, VlanId, VlanLink};

/// Directory the kernel exposes once 802.1Q support is available
const PROC_NET_VLAN: &str = "/proc/net/vlan";

/// Link and address primitives the reconciler and inspector are built on
pub trait LinkManager {
    /// Make sure the kernel can create 802.1Q devices
    fn ensure_vlan_support(&self) -> Result<()>;

    /// VLAN links stacked on `parent`, either by lower device or by the
    /// `<parent>.` naming convention
    fn vlan_links(&self, parent: &str) -> Result<Vec<VlanLink>>;

    fn set_up(&self, device: &str) -> Result<()>;

    fn set_down(&self, device: &str) -> Result<()>;

    /// Create `name` as an 802.1Q device on `parent` tagged with `vlan_id`
    fn add_vlan(&self, parent: &str, name: &str, vlan_id: VlanId) -> Result<()>;

    fn delete_link(&self, device: &str) -> Result<()>;

    /// Add a `<ip>/<prefix>` address to `device`
    fn add_address(&self, device: &str, cidr: &str) -> Result<()>;

    /// Addresses currently bound to `device`, in kernel order
    fn addresses(&self, device: &str) -> Result<Vec<IpNetwork>>;
}

impl<T: LinkManager + ?Sized> LinkManager for &T {
    fn ensure_vlan_support(&self) -> Result<()> {
        (**self).ensure_vlan_support()
    }

    fn vlan_links(&self, parent: &str) -> Result<Vec<VlanLink>> {
        (**self).vlan_links(parent)
    }

    fn set_up(&self, device: &str) -> Result<()> {
        (**self).set_up(device)
    }

    fn set_down(&self, device: &str) -> Result<()> {
        (**self).set_down(device)
    }

    fn add_vlan(&self, parent: &str, name: &str, vlan_id: VlanId) -> Result<()> {
        (**self).add_vlan(parent, name, vlan_id)
    }

    fn delete_link(&self, device: &str) -> Result<()> {
        (**self).delete_link(device)
    }

    fn add_address(&self, device: &str, cidr: &str) -> Result<()> {
        (**self).add_address(device, cidr)
    }

    fn addresses(&self, device: &str) -> Result<Vec<IpNetwork>> {
        (**self).addresses(device)
    }
}

/// [`LinkManager`] backed by iproute2's `ip` and `modprobe`
#[derive(Debug, Clone)]
pub struct IpLinkManager {
    /// `ip` binary, resolved through `PATH` unless absolute
    ip: PathBuf,
    /// `modprobe` binary used to load the 802.1Q module
    modprobe: PathBuf,
    /// Present once the kernel has 802.1Q support loaded
    proc_vlan: PathBuf,
    vlan_module: String,
}

impl IpLinkManager {
    pub fn new(vlan_module: &str) -> Self {
        Self {
            ip: PathBuf::from("ip"),
            modprobe: PathBuf::from("modprobe"),
            proc_vlan: PathBuf::from(PROC_NET_VLAN),
            vlan_module: vlan_module.to_string(),
        }
    }

    /// Use a different `ip` binary
    pub fn with_ip(mut self, ip: impl Into<PathBuf>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Use a different `modprobe` binary
    pub fn with_modprobe(mut self, modprobe: impl Into<PathBuf>) -> Self {
        self.modprobe = modprobe.into();
        self
    }

    /// Check a different path for loaded 802.1Q support
    pub fn with_proc_vlan(mut self, proc_vlan: impl Into<PathBuf>) -> Self {
        self.proc_vlan = proc_vlan.into();
        self
    }

    /// Run `ip` with `args`, returning stdout on success
    fn run_ip(&self, args: &[&str], operation: &str) -> Result<String> {
        debug!("{} {}", self.ip.display(), args.join(" "));

        let output = Command::new(&self.ip)
            .args(args)
            .output()
            .map_err(|source| VlanError::Spawn {
                program: self.ip.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(VlanError::External {
                operation: operation.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl LinkManager for IpLinkManager {
    fn ensure_vlan_support(&self) -> Result<()> {
        debug!("{} {}", self.modprobe.display(), self.vlan_module);
        let outcome = Command::new(&self.modprobe).arg(&self.vlan_module).output();

        let failure = match outcome {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => String::from_utf8_lossy(&output.stderr).trim().to_string(),
            Err(err) => err.to_string(),
        };

        if self.proc_vlan.exists() {
            warn!(
                "Failed to load {} ({}), but VLAN support is already present",
                self.vlan_module, failure
            );
            return Ok(());
        }

        Err(VlanError::External {
            operation: format!("modprobe {}", self.vlan_module),
            stderr: failure,
        })
    }

    fn vlan_links(&self, parent: &str) -> Result<Vec<VlanLink>> {
        let stdout = self.run_ip(
            &["-j", "-d", "link", "show", "type", "vlan"],
            "ip link show type vlan",
        )?;
        decode_vlan_links(&stdout, parent)
    }

    fn set_up(&self, device: &str) -> Result<()> {
        self.run_ip(
            &["link", "set", "dev", device, "up"],
            &format!("bringing up {}", device),
        )
        .map(drop)
    }

    fn set_down(&self, device: &str) -> Result<()> {
        self.run_ip(
            &["link", "set", "dev", device, "down"],
            &format!("bringing down {}", device),
        )
        .map(drop)
    }

    fn add_vlan(&self, parent: &str, name: &str, vlan_id: VlanId) -> Result<()> {
        let id = vlan_id.to_string();
        self.run_ip(
            &["link", "add", "link", parent, "name", name, "type", "vlan", "id", id.as_str()],
            &format!("creating {}", name),
        )
        .map(drop)
    }

    fn delete_link(&self, device: &str) -> Result<()> {
        self.run_ip(
            &["link", "delete", "dev", device],
            &format!("deleting {}", device),
        )
        .map(drop)
    }

    fn add_address(&self, device: &str, cidr: &str) -> Result<()> {
        self.run_ip(
            &["addr", "add", cidr, "dev", device],
            &format!("adding {} to {}", cidr, device),
        )
        .map(drop)
    }

    fn addresses(&self, device: &str) -> Result<Vec<IpNetwork>> {
        let stdout = self.run_ip(
            &["-j", "addr", "show", "dev", device],
            &format!("ip addr show dev {}", device),
        )?;
        decode_addresses(&stdout, device)
    }
}

/// One element of `ip -j link show` output. With a `type` filter iproute2
/// prints `{}` for every link the filter rejects, so every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpLink {
    ifname: Option<String>,
    /// Lower device name
    link: Option<String>,
    flags: Option<Vec<String>>,
    linkinfo: Option<LinkInfo>,
}

#[derive(Debug, Deserialize)]
struct LinkInfo {
    info_kind: Option<String>,
    info_data: Option<VlanInfoData>,
}

#[derive(Debug, Deserialize)]
struct VlanInfoData {
    id: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct IpAddrEntry {
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Deserialize)]
struct AddrInfo {
    local: Option<String>,
    prefixlen: Option<u8>,
}

/// Decode `ip -j -d link show type vlan` output, keeping links on `parent`
pub(crate) fn decode_vlan_links(stdout: &str, parent: &str) -> Result<Vec<VlanLink>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let links: Vec<IpLink> =
        serde_json::from_str(stdout).map_err(|err| VlanError::UnexpectedOutput {
            operation: "ip link show type vlan".to_string(),
            reason: err.to_string(),
        })?;

    let prefix = format!("{}.", parent);
    let vlans = links
        .into_iter()
        .filter_map(|mut l| l.ifname.take().map(|name| (name, l)))
        .filter(|(_, l)| {
            l.linkinfo
                .as_ref()
                .and_then(|i| i.info_kind.as_deref())
                .map_or(true, |kind| kind == "vlan")
        })
        .filter(|(name, l)| name.starts_with(&prefix) || l.link.as_deref() == Some(parent))
        .map(|(name, l)| {
            let admin_state = match &l.flags {
                Some(flags) if flags.iter().any(|f| f == "UP") => AdminState::Up,
                Some(_) => AdminState::Down,
                None => AdminState::Unknown,
            };
            let kernel_id = l
                .linkinfo
                .and_then(|i| i.info_data)
                .and_then(|d| d.id);
            VlanLink {
                name,
                kernel_id,
                admin_state,
            }
        })
        .collect();

    Ok(vlans)
}

/// Decode `ip -j addr show dev <device>` output
pub(crate) fn decode_addresses(stdout: &str, device: &str) -> Result<Vec<IpNetwork>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let operation = format!("ip addr show dev {}", device);
    let entries: Vec<IpAddrEntry> =
        serde_json::from_str(stdout).map_err(|err| VlanError::UnexpectedOutput {
            operation: operation.clone(),
            reason: err.to_string(),
        })?;

    let mut networks = Vec::new();
    for info in entries.into_iter().flat_map(|e| e.addr_info) {
        let (Some(local), Some(prefix)) = (info.local, info.prefixlen) else {
            continue;
        };
        let ip: IpAddr = local.parse().map_err(|_| VlanError::UnexpectedOutput {
            operation: operation.clone(),
            reason: format!("invalid address '{}'", local),
        })?;
        let network = IpNetwork::new(ip, prefix).map_err(|err| VlanError::UnexpectedOutput {
            operation: operation.clone(),
            reason: err.to_string(),
        })?;
        networks.push(network);
    }

    Ok(networks)
}
