//! Desired gateway state document
//!
//! A TOML file naming the target hostname, MTU, address, DHCP role and
//! modem connection. Every section is optional.
//!
//! ```toml
//! hostname = "gw-01"
//!
//! [ipv4]
//! address = "10.0.0.5"
//! netmask = "255.255.255.0"
//! device = "eth0"
//!
//! [dhcp]
//! mode = "server"
//! pool_offset = 100
//! pool_size = 50
//! ```

use crate::dhcp::{DhcpMode, DhcpServerSettings};
use crate::error::{GwctlError, GwctlResult};
use crate::modem::ModemRequest;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<MtuTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Target>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<DhcpTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modem: Option<ModemRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtuTarget {
    pub device: String,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Target {
    pub address: String,
    /// Prefix length or dotted mask
    pub netmask: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpTarget {
    pub mode: DhcpMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
}

impl DhcpTarget {
    pub fn server_settings(&self) -> DhcpServerSettings {
        let text = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        DhcpServerSettings {
            pool_offset: text(self.pool_offset),
            pool_size: text(self.pool_size),
            lease_time_seconds: text(self.lease_time),
            domain_name: self.domain_name.clone().unwrap_or_default(),
        }
    }
}

impl DesiredState {
    /// Load a desired-state document from TOML
    pub async fn from_file<P: AsRef<Path>>(path: P) -> GwctlResult<Self> {
        let path = path.as_ref();
        info!("Loading desired state from: {}", path.display());

        let contents = fs::read_to_string(path).await?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> GwctlResult<Self> {
        toml::from_str(contents).map_err(|e| GwctlError::ConfigError(format!("Invalid TOML: {}", e)))
    }

    /// Check every section before anything is applied
    pub fn validate(&self) -> GwctlResult<()> {
        if let Some(ref hostname) = self.hostname {
            validation::require("Hostname", hostname)?;
            validation::sanitize_config_value("Hostname", hostname)?;
        }
        if let Some(ref mtu) = self.mtu {
            validation::validate_interface_name(&mtu.device)?;
            validation::validate_mtu(&mtu.value.to_string())?;
        }
        if let Some(ref ipv4) = self.ipv4 {
            validation::validate_ipv4_address(&ipv4.address)?;
            validation::netmask_to_prefix(&ipv4.netmask)?;
            validation::validate_interface_name(&ipv4.device)?;
        }
        if let Some(ref dhcp) = self.dhcp {
            match dhcp.mode {
                DhcpMode::Server => {
                    if dhcp.pool_offset.is_none() || dhcp.pool_size.is_none() {
                        return Err(GwctlError::invalid("DHCP server mode needs pool_offset and pool_size"));
                    }
                    dhcp.server_settings().validate()?;
                }
                DhcpMode::Client => {}
                DhcpMode::Unconfigured => {
                    return Err(GwctlError::invalid("DHCP mode must be client or server"));
                }
            }
        }
        if let Some(ref modem) = self.modem {
            modem.validate()?;
        }
        Ok(())
    }
}
