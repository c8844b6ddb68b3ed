//! gwctl - Gateway Control Library
//!
//! Reconciles a gateway's network identity and connectivity against a
//! desired target:
//! - Hostname, link MTU and the primary IPv4 address
//! - DHCP client / local DHCP server role
//! - Cellular modem connection, including the boot-time autostart
//!
//! Configuration files live on a read-only root filesystem; every change
//! goes through the config store, which opens a short writable window.

pub mod error;
pub mod validation;
pub mod config;
pub mod command;
pub mod writable_root;
pub mod config_store;
pub mod service;
pub mod network;
pub mod dhcp;
pub mod modem;
pub mod desired_state;
pub mod gateway;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use error::{GwctlError, GwctlResult};
pub use config::{GwctlConfig, RetryPolicy};
pub use command::{CommandResult, CommandRunner, Executor, SystemRunner};
pub use writable_root::WritableRoot;
pub use config_store::{ConfigFile, ConfigStore, ModemProfile, NetworkLinkConfig, UnmanagedState};
pub use network::{Ipv4Change, Ipv4Cidr, NetworkReconciler};
pub use dhcp::{DhcpMode, DhcpServerSettings, DhcpToggle};
pub use modem::{AutostartOutcome, ModemManager, ModemOutcome, ModemRequest};
pub use desired_state::DesiredState;
pub use gateway::{ApplyReport, Gateway, GatewayStatus};
