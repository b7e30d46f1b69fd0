//! Converges the VLAN subinterfaces of a parent device onto a desired set.
//!
//! Every pass is a full replace: all `<parent>.*` VLAN devices are torn down
//! before the desired ones are created, so running the same definitions twice
//! ends in the same live set. Nothing is rolled back on failure; a pass that
//! stops partway leaves the old devices removed and only the entries before
//! the failing one applied.
//!
//! Devices stacked on another `<parent>.*` device are removed before their
//! lower device, since deleting a lower device takes its uppers with it.

use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::debug;

use crate::dhcp::AddressAcquirer;
use crate::error::Result;
use crate::link::LinkManager;
use crate::types::{Action, AddressSpec, ApplyReport, VlanEntry, VlanId};

/// Applies desired VLAN state through a [`LinkManager`] and [`AddressAcquirer`]
pub struct VlanReconciler<L, A> {
    links: L,
    dhcp: A,
    dry_run: bool,
}

impl<L: LinkManager, A: AddressAcquirer> VlanReconciler<L, A> {
    /// Create a reconciler. In dry-run mode nothing is mutated and the report
    /// lists what would have been done.
    pub fn new(links: L, dhcp: A, dry_run: bool) -> Self {
        Self {
            links,
            dhcp,
            dry_run,
        }
    }

    /// Make the VLAN set on `parent` match `entries`
    pub fn apply(&self, parent: &str, entries: &[VlanEntry]) -> Result<ApplyReport> {
        let mut report = ApplyReport::new(parent, self.dry_run);

        if self.dry_run {
            debug!("Dry run: skipping 802.1Q module load");
        } else {
            self.links.ensure_vlan_support()?;
            self.links.set_up(parent)?;
        }
        report.record(Action::BringUp {
            device: parent.to_string(),
        });

        self.teardown(parent, &mut report)?;

        let mut created: HashSet<VlanId> = HashSet::new();
        for entry in entries {
            let subif = entry.vlan_id.subinterface(parent);

            if created.insert(entry.vlan_id) {
                if !self.dry_run {
                    self.links.add_vlan(parent, &subif, entry.vlan_id)?;
                    self.links.set_up(&subif)?;
                }
                report.record(Action::Create {
                    device: subif.clone(),
                    vlan_id: entry.vlan_id,
                });
            }

            match &entry.address {
                AddressSpec::Static { cidr } => {
                    if !self.dry_run {
                        self.links.add_address(&subif, cidr)?;
                    }
                    report.record(Action::AssignAddress {
                        device: subif,
                        cidr: cidr.clone(),
                    });
                }
                AddressSpec::Dhcp { family } => {
                    let client = if self.dry_run {
                        self.dhcp.select(*family)?
                    } else {
                        self.dhcp.acquire(&subif, *family)?
                    };
                    report.record(Action::Lease {
                        device: subif,
                        family: *family,
                        client: client.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Remove every `<parent>.*` VLAN device without creating anything
    pub fn reset(&self, parent: &str) -> Result<ApplyReport> {
        let mut report = ApplyReport::new(parent, self.dry_run);
        self.teardown(parent, &mut report)?;
        Ok(report)
    }

    fn teardown(&self, parent: &str, report: &mut ApplyReport) -> Result<()> {
        let prefix = format!("{}.", parent);
        let mut stale: Vec<String> = self
            .links
            .vlan_links(parent)?
            .into_iter()
            .map(|link| link.name)
            .filter(|name| name.starts_with(&prefix))
            .collect();
        // Uppers first; the sort is stable so kernel order holds within a depth
        stale.sort_by_key(|name| Reverse(name.matches('.').count()));

        debug!("Found {} existing VLAN devices on {}", stale.len(), parent);

        for device in stale {
            if !self.dry_run {
                self.dhcp.release(&device)?;
                self.links.set_down(&device)?;
                self.links.delete_link(&device)?;
            }
            report.record(Action::Remove { device });
        }

        Ok(())
    }
}
