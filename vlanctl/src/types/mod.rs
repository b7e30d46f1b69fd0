use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest usable 802.1Q tag
pub const VLAN_ID_MIN: u16 = 1;
/// Highest usable 802.1Q tag (4095 is reserved)
pub const VLAN_ID_MAX: u16 = 4094;

/// An 802.1Q VLAN tag in the range 1-4094
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Parse a VLAN id token. Only plain decimal digits are accepted.
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        text.parse::<u16>().ok().and_then(Self::new)
    }

    /// Build a VLAN id from a raw tag, rejecting 0 and 4095+.
    pub fn new(raw: u16) -> Option<Self> {
        (VLAN_ID_MIN..=VLAN_ID_MAX).contains(&raw).then_some(Self(raw))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Conventional subinterface name: `<parent>.<id>`
    pub fn subinterface(self, parent: &str) -> String {
        format!("{}.{}", parent, self.0)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = String;

    fn try_from(raw: u16) -> std::result::Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("invalid VLAN id {} (must be between 1 and 4094)", raw))
    }
}

impl From<VlanId> for u16 {
    fn from(id: VlanId) -> Self {
        id.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IP address family requested from a DHCP client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "DHCPv4"),
            AddressFamily::V6 => write!(f, "DHCPv6"),
        }
    }
}

/// How a subinterface gets one of its addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    /// Literal `<ip>/<prefix>` handed to the link manager as-is
    Static { cidr: String },
    /// Delegated to a DHCP client
    Dhcp { family: AddressFamily },
}

/// One line of the desired-state file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanEntry {
    /// 1-based line number in the source file
    pub line: usize,
    /// Tag of the subinterface the address belongs to
    pub vlan_id: VlanId,
    /// Address to add, literal or leased
    pub address: AddressSpec,
}

/// Administrative state of a link as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    Up,
    Down,
    Unknown,
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminState::Up => write!(f, "up"),
            AdminState::Down => write!(f, "down"),
            AdminState::Unknown => write!(f, "unknown"),
        }
    }
}

/// A VLAN link found on the system, before its addresses are looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanLink {
    /// Interface name as reported by the kernel
    pub name: String,
    /// Tag reported by the kernel, when the link details carry one
    pub kernel_id: Option<u16>,
    /// Whether the link is administratively up
    pub admin_state: AdminState,
}

/// Observed state of one VLAN subinterface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveVlanDevice {
    /// Interface name, e.g. `eth0.200`
    pub name: String,
    /// Tag from the `<parent>.<id>` name, or the kernel's tag for other names
    pub vlan_id: Option<u16>,
    /// Administrative state
    pub admin_state: AdminState,
    /// IPv4 addresses in `<ip>/<prefix>` form, kernel order
    pub ipv4_addresses: Vec<String>,
    /// IPv6 addresses in `<ip>/<prefix>` form, kernel order
    pub ipv6_addresses: Vec<String>,
}

/// A single step taken (or planned) by the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Parent device brought up
    BringUp { device: String },
    /// Existing VLAN device deleted
    Remove { device: String },
    /// VLAN device created and brought up
    Create { device: String, vlan_id: VlanId },
    /// Static address added
    AssignAddress { device: String, cidr: String },
    /// Address leased through the named DHCP client
    Lease {
        device: String,
        family: AddressFamily,
        client: String,
    },
}

impl Action {
    /// Operator-facing description, phrased as intent for dry runs and as
    /// confirmation otherwise.
    pub fn describe(&self, dry_run: bool) -> String {
        match (self, dry_run) {
            (Action::BringUp { device }, true) => format!("would bring up {}", device),
            (Action::BringUp { device }, false) => format!("brought up {}", device),
            (Action::Remove { device }, true) => format!("would remove {}", device),
            (Action::Remove { device }, false) => format!("removed {}", device),
            (Action::Create { device, vlan_id }, true) => {
                format!("would create {} (vlan {})", device, vlan_id)
            }
            (Action::Create { device, vlan_id }, false) => {
                format!("created {} (vlan {})", device, vlan_id)
            }
            (Action::AssignAddress { device, cidr }, true) => {
                format!("would assign {} to {}", cidr, device)
            }
            (Action::AssignAddress { device, cidr }, false) => {
                format!("assigned {} to {}", cidr, device)
            }
            (Action::Lease { device, family, client }, true) => {
                format!("would request {} lease on {} using {}", family, device, client)
            }
            (Action::Lease { device, family, client }, false) => {
                format!("obtained {} lease on {} using {}", family, device, client)
            }
        }
    }
}

/// Outcome of a completed reconciliation or reset pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Parent device the pass ran against
    pub parent: String,
    /// Whether the actions were only planned
    pub dry_run: bool,
    /// Actions in the order they were taken
    pub actions: Vec<Action>,
}

impl ApplyReport {
    pub fn new(parent: &str, dry_run: bool) -> Self {
        Self {
            parent: parent.to_string(),
            dry_run,
            actions: Vec::new(),
        }
    }

    /// Add an action to the report
    pub fn record(&mut self, action: Action) {
        tracing::debug!("{}", action.describe(self.dry_run));
        self.actions.push(action);
    }

    /// Operator-facing action log, one line per action
    pub fn lines(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|action| action.describe(self.dry_run))
            .collect()
    }

    /// Devices created during the pass, in creation order
    pub fn created(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Create { device, .. } => Some(device.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Devices removed during the pass
    pub fn removed(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Remove { device } => Some(device.as_str()),
                _ => None,
            })
            .collect()
    }
}
