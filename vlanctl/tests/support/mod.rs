// In-memory stand-ins for the link table and DHCP clients

#![allow(dead_code)]

use ipnetwork::IpNetwork;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use vlanctl::dhcp::{select_client, AddressAcquirer, ClientPreference, DhcpClient};
use vlanctl::error::{Result, VlanError};
use vlanctl::link::LinkManager;
use vlanctl::types::{AddressFamily, AdminState, VlanId, VlanLink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDevice {
    pub parent: String,
    pub vlan_id: u16,
    pub up: bool,
    pub addresses: Vec<String>,
}

/// Models the kernel link table for a single host
#[derive(Debug, Default)]
pub struct FakeLinks {
    devices: RefCell<BTreeMap<String, FakeDevice>>,
    up: RefCell<BTreeSet<String>>,
    calls: RefCell<Vec<String>>,
    rejected_address: Option<String>,
}

impl FakeLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a VLAN device
    pub fn with_device(self, name: &str, parent: &str, vlan_id: u16, addresses: &[&str]) -> Self {
        self.devices.borrow_mut().insert(
            name.to_string(),
            FakeDevice {
                parent: parent.to_string(),
                vlan_id,
                up: true,
                addresses: addresses.iter().map(|a| a.to_string()).collect(),
            },
        );
        self
    }

    /// Make `add_address` fail for `cidr`, as the kernel does for bad input
    pub fn rejecting_address(mut self, cidr: &str) -> Self {
        self.rejected_address = Some(cidr.to_string());
        self
    }

    pub fn snapshot(&self) -> BTreeMap<String, FakeDevice> {
        self.devices.borrow().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.devices.borrow().keys().cloned().collect()
    }

    /// Every mutating call made, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn is_up(&self, device: &str) -> bool {
        self.up.borrow().contains(device)
            || self
                .devices
                .borrow()
                .get(device)
                .map(|d| d.up)
                .unwrap_or(false)
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

fn missing(device: &str) -> VlanError {
    VlanError::External {
        operation: format!("operating on {}", device),
        stderr: format!("Cannot find device \"{}\"", device),
    }
}

impl LinkManager for FakeLinks {
    fn ensure_vlan_support(&self) -> Result<()> {
        self.record("modprobe".to_string());
        Ok(())
    }

    fn vlan_links(&self, parent: &str) -> Result<Vec<VlanLink>> {
        let prefix = format!("{}.", parent);
        Ok(self
            .devices
            .borrow()
            .iter()
            .filter(|(name, dev)| name.starts_with(&prefix) || dev.parent == parent)
            .map(|(name, dev)| VlanLink {
                name: name.clone(),
                kernel_id: Some(dev.vlan_id),
                admin_state: if dev.up {
                    AdminState::Up
                } else {
                    AdminState::Down
                },
            })
            .collect())
    }

    fn set_up(&self, device: &str) -> Result<()> {
        self.record(format!("up {}", device));
        match self.devices.borrow_mut().get_mut(device) {
            Some(dev) => dev.up = true,
            None => {
                self.up.borrow_mut().insert(device.to_string());
            }
        }
        Ok(())
    }

    fn set_down(&self, device: &str) -> Result<()> {
        self.record(format!("down {}", device));
        let mut devices = self.devices.borrow_mut();
        let dev = devices.get_mut(device).ok_or_else(|| missing(device))?;
        dev.up = false;
        Ok(())
    }

    fn add_vlan(&self, parent: &str, name: &str, vlan_id: VlanId) -> Result<()> {
        self.record(format!("add {} {} {}", parent, name, vlan_id));
        let mut devices = self.devices.borrow_mut();
        if devices.contains_key(name) {
            return Err(VlanError::External {
                operation: format!("creating {}", name),
                stderr: "RTNETLINK answers: File exists".to_string(),
            });
        }
        devices.insert(
            name.to_string(),
            FakeDevice {
                parent: parent.to_string(),
                vlan_id: vlan_id.get(),
                up: false,
                addresses: Vec::new(),
            },
        );
        Ok(())
    }

    /// Like the kernel, deleting a device also deletes every device stacked on it
    fn delete_link(&self, device: &str) -> Result<()> {
        self.record(format!("delete {}", device));
        let mut devices = self.devices.borrow_mut();
        devices.remove(device).ok_or_else(|| missing(device))?;

        let mut lowers = vec![device.to_string()];
        while let Some(lower) = lowers.pop() {
            let uppers: Vec<String> = devices
                .iter()
                .filter(|(_, dev)| dev.parent == lower)
                .map(|(name, _)| name.clone())
                .collect();
            for upper in uppers {
                devices.remove(&upper);
                lowers.push(upper);
            }
        }
        Ok(())
    }

    fn add_address(&self, device: &str, cidr: &str) -> Result<()> {
        self.record(format!("addr {} {}", device, cidr));
        if self.rejected_address.as_deref() == Some(cidr) {
            return Err(VlanError::External {
                operation: format!("adding {} to {}", cidr, device),
                stderr: "Error: any valid prefix is expected".to_string(),
            });
        }
        let mut devices = self.devices.borrow_mut();
        let dev = devices.get_mut(device).ok_or_else(|| missing(device))?;
        if dev.addresses.iter().any(|a| a == cidr) {
            return Err(VlanError::External {
                operation: format!("adding {} to {}", cidr, device),
                stderr: "RTNETLINK answers: File exists".to_string(),
            });
        }
        dev.addresses.push(cidr.to_string());
        Ok(())
    }

    fn addresses(&self, device: &str) -> Result<Vec<IpNetwork>> {
        let devices = self.devices.borrow();
        let dev = devices.get(device).ok_or_else(|| missing(device))?;
        Ok(dev
            .addresses
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect())
    }
}

/// DHCP acquirer with a fixed set of installed clients; leases are recorded
#[derive(Debug)]
pub struct FakeDhcp {
    installed: Vec<DhcpClient>,
    preference: ClientPreference,
    leases: RefCell<Vec<(String, AddressFamily, DhcpClient)>>,
    released: RefCell<Vec<String>>,
}

impl FakeDhcp {
    pub fn with_clients(installed: &[DhcpClient]) -> Self {
        Self {
            installed: installed.to_vec(),
            preference: ClientPreference::Auto,
            leases: RefCell::new(Vec::new()),
            released: RefCell::new(Vec::new()),
        }
    }

    pub fn preferring(mut self, preference: ClientPreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn leases(&self) -> Vec<(String, AddressFamily, DhcpClient)> {
        self.leases.borrow().clone()
    }

    /// Devices whose leases were released, in order
    pub fn released(&self) -> Vec<String> {
        self.released.borrow().clone()
    }
}

impl AddressAcquirer for FakeDhcp {
    fn select(&self, family: AddressFamily) -> Result<DhcpClient> {
        let probe = |client: DhcpClient| {
            self.installed
                .contains(&client)
                .then(|| PathBuf::from("/sbin").join(client.binary()))
        };
        select_client(self.preference, &DhcpClient::DEFAULT_PRIORITY, family, &probe).map(|(c, _)| c)
    }

    fn lease(&self, device: &str, family: AddressFamily, client: DhcpClient) -> Result<()> {
        self.leases
            .borrow_mut()
            .push((device.to_string(), family, client));
        Ok(())
    }

    fn release(&self, device: &str) -> Result<()> {
        self.released.borrow_mut().push(device.to_string());
        Ok(())
    }
}
