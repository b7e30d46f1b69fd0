//! Declarative 802.1Q VLAN provisioning
//!
//! This crate converges the VLAN subinterfaces of a parent network device
//! onto a line-oriented definitions file:
//! - Tears down existing `<parent>.<id>` devices
//! - Creates one tagged subinterface per distinct VLAN id
//! - Assigns static addresses or delegates to a DHCP client
//! - Reports live VLAN state read-only

pub mod commands;
pub mod config;
pub mod dhcp;
pub mod error;
pub mod inspect;
pub mod link;
pub mod reconcile;
pub mod types;

// Re-export commonly used items
pub use commands::{run, Invocation, Mode};
pub use config::VlanctlConfig;
pub use error::{ErrorKind, VlanError};
pub use reconcile::VlanReconciler;
