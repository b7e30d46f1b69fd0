use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dhcp::{ClientPreference, DhcpClient, DEFAULT_RUN_DIR};
use crate::error::{Result, VlanError};

pub mod parser;

pub use parser::{load_definitions, parse_definitions, parse_line};

/// Tool-wide defaults, optionally loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VlanctlConfig {
    /// Parent interface used when none is given on the command line
    pub default_parent: String,
    /// Definitions file used when none is given on the command line
    pub definitions: PathBuf,
    /// Order in which DHCP clients are probed in auto mode
    pub dhcp_priority: Vec<DhcpClient>,
    /// Client preference used when none is given on the command line
    pub dhcp_client: ClientPreference,
    /// Kernel module providing 802.1Q support
    pub vlan_module: String,
    /// Directory for the pid files of DHCP clients that stay resident
    pub run_dir: PathBuf,
}

impl Default for VlanctlConfig {
    fn default() -> Self {
        Self {
            default_parent: "eth0".to_string(),
            definitions: PathBuf::from("vlans.conf"),
            dhcp_priority: DhcpClient::DEFAULT_PRIORITY.to_vec(),
            dhcp_client: ClientPreference::Auto,
            vlan_module: "8021q".to_string(),
            run_dir: PathBuf::from(DEFAULT_RUN_DIR),
        }
    }
}

impl VlanctlConfig {
    /// Load configuration from `path`, or return defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let invalid = |reason: String| VlanError::Config {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = fs::read(path).map_err(|err| invalid(err.to_string()))?;
        let config: VlanctlConfig =
            serde_json::from_slice(&bytes).map_err(|err| invalid(err.to_string()))?;

        if config.default_parent.is_empty() {
            return Err(invalid("default_parent must not be empty".to_string()));
        }
        if config.dhcp_priority.is_empty() {
            return Err(invalid("dhcp_priority must list at least one client".to_string()));
        }

        Ok(config)
    }
}
