//! DHCP client / local DHCP server mode toggle
//!
//! The link config carries two flags that must never both be true. Both
//! toggles write the pair in one file update, then restart the network
//! manager so the new role takes effect.

use crate::command::CommandResult;
use crate::config_store::{
    flag, ConfigFile, ConfigStore, KEY_DHCP_CLIENT, KEY_DHCP_SERVER, KEY_DOMAIN_NAME,
    KEY_LEASE_TIME, KEY_POOL_OFFSET, KEY_POOL_SIZE, SECTION_DHCP_SERVER, SECTION_NETWORK,
};
use crate::error::{GwctlError, GwctlResult};
use crate::service::ManagerService;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Address-assignment role of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhcpMode {
    Client,
    Server,
    /// Neither flag is set in the stored config
    Unconfigured,
}

impl fmt::Display for DhcpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DhcpMode::Client => write!(f, "client"),
            DhcpMode::Server => write!(f, "server"),
            DhcpMode::Unconfigured => write!(f, "unconfigured"),
        }
    }
}

/// Address pool handed out in server mode; empty strings mean "not given"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpServerSettings {
    pub pool_offset: String,
    pub pool_size: String,
    #[serde(default)]
    pub lease_time_seconds: String,
    #[serde(default)]
    pub domain_name: String,
}

impl DhcpServerSettings {
    pub fn new(pool_offset: impl Into<String>, pool_size: impl Into<String>) -> Self {
        Self {
            pool_offset: pool_offset.into(),
            pool_size: pool_size.into(),
            ..Default::default()
        }
    }

    /// Checked `(key, value)` pairs for the `[DHCPServer]` section
    fn entries(&self) -> GwctlResult<Vec<(&'static str, String)>> {
        let offset = validation::require_number("Pool offset", &self.pool_offset)?;
        let size = validation::require_number("Pool size", &self.pool_size)?;
        if size == 0 {
            return Err(GwctlError::invalid("Pool size must be greater than zero"));
        }

        let mut entries = vec![
            (KEY_POOL_OFFSET, offset.to_string()),
            (KEY_POOL_SIZE, size.to_string()),
        ];
        // Absent optionals are written empty so a previous value is cleared
        let lease = match validation::optional(Some(self.lease_time_seconds.as_str())) {
            Some(lease) => validation::require_number("Lease time", lease)?.to_string(),
            None => String::new(),
        };
        entries.push((KEY_LEASE_TIME, lease));
        let domain = match validation::optional(Some(self.domain_name.as_str())) {
            Some(domain) => {
                validation::sanitize_config_value("Domain name", domain)?;
                domain.to_string()
            }
            None => String::new(),
        };
        entries.push((KEY_DOMAIN_NAME, domain));
        Ok(entries)
    }

    /// Check the settings without writing anything
    pub fn validate(&self) -> GwctlResult<()> {
        self.entries().map(|_| ())
    }
}

pub struct DhcpToggle {
    store: Arc<ConfigStore>,
    service: Arc<ManagerService>,
}

impl DhcpToggle {
    pub fn new(store: Arc<ConfigStore>, service: Arc<ManagerService>) -> Self {
        Self { store, service }
    }

    /// Mode encoded in the stored config
    pub async fn current_mode(&self) -> GwctlResult<DhcpMode> {
        let config = match self.store.link_config().await {
            Ok(config) => config,
            Err(GwctlError::ConfigNotFound(path)) => {
                debug!(path = %path.display(), "No link config yet");
                return Ok(DhcpMode::Unconfigured);
            }
            Err(e) => return Err(e),
        };

        Ok(match (config.dhcp_client_enabled, config.dhcp_server_enabled) {
            (true, false) => DhcpMode::Client,
            (false, true) => DhcpMode::Server,
            // Both set is a broken file; the next toggle repairs it
            _ => DhcpMode::Unconfigured,
        })
    }

    /// Stored pool settings, if the server section has any
    pub async fn server_settings(&self) -> GwctlResult<Option<DhcpServerSettings>> {
        let section = match self.store.read_section(ConfigFile::Link, SECTION_DHCP_SERVER).await {
            Ok(section) => section,
            Err(GwctlError::ConfigNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if section.is_empty() {
            return Ok(None);
        }
        let get = |key: &str| section.get(key).cloned().unwrap_or_default();
        Ok(Some(DhcpServerSettings {
            pool_offset: get(KEY_POOL_OFFSET),
            pool_size: get(KEY_POOL_SIZE),
            lease_time_seconds: get(KEY_LEASE_TIME),
            domain_name: get(KEY_DOMAIN_NAME),
        }))
    }

    /// Switch to local DHCP server mode
    pub async fn enable_dhcp_server(&self, settings: &DhcpServerSettings) -> GwctlResult<CommandResult> {
        let pool = settings.entries()?;
        let previous = self.current_mode().await?;
        info!(from = %previous, pool_offset = %settings.pool_offset, pool_size = %settings.pool_size, "Enabling DHCP server");

        let pool: Vec<(&str, &str)> = pool.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let flags = [(KEY_DHCP_CLIENT, flag(false)), (KEY_DHCP_SERVER, flag(true))];
        self.store
            .write_sections(
                ConfigFile::Link,
                &[(SECTION_NETWORK, &flags[..]), (SECTION_DHCP_SERVER, &pool[..])],
            )
            .await?;

        self.service.restart().await
    }

    /// Switch to DHCP client mode
    pub async fn enable_dhcp_client(&self) -> GwctlResult<CommandResult> {
        let previous = self.current_mode().await?;
        info!(from = %previous, "Enabling DHCP client");

        self.store
            .write_keys(
                ConfigFile::Link,
                SECTION_NETWORK,
                &[(KEY_DHCP_CLIENT, flag(true)), (KEY_DHCP_SERVER, flag(false))],
            )
            .await?;

        self.service.restart().await
    }
}
