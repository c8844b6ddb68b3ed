//! Configuration management for gwctl
//!
//! Where the managed files live, which service and device to drive, the
//! remount commands and the modem autostart schedule.

use crate::error::{GwctlError, GwctlResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the runtime configuration
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gwctl/gwctl.toml";

/// Main gwctl configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GwctlConfig {
    #[serde(default)]
    pub paths: ConfigPaths,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub modem: ModemSettings,
    #[serde(default)]
    pub root: RootSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPaths {
    /// Link network config (`[Network]`, `[DHCPServer]`)
    #[serde(default = "default_link_config")]
    pub link_config: PathBuf,
    /// Unmanaged-device list (`[keyfile]`)
    #[serde(default = "default_unmanaged_config")]
    pub unmanaged_config: PathBuf,
    /// Persisted modem profile (`[Modem]`)
    #[serde(default = "default_modem_profile")]
    pub modem_profile: PathBuf,
    /// Device node that appears once the modem has enumerated
    #[serde(default = "default_modem_device")]
    pub modem_device: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Interface whose unmanaged flag is toggled around address changes
    #[serde(default = "default_primary_device")]
    pub primary_device: String,
    /// systemd unit of the network manager
    #[serde(default = "default_service")]
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModemSettings {
    /// Wait after a SIM unlock before creating the connection
    #[serde(default = "default_sim_settle_ms")]
    pub sim_settle_ms: u64,
    /// Wait before the first device-node poll at boot
    #[serde(default = "default_warm_up_ms")]
    pub warm_up_ms: u64,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSettings {
    #[serde(default = "default_remount_rw")]
    pub remount_rw: Vec<String>,
    #[serde(default = "default_remount_ro")]
    pub remount_ro: Vec<String>,
}

/// Bounded fixed-interval retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub warm_up: Duration,
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// No waiting at all, used by tests
    pub fn immediate(attempts: u32) -> Self {
        Self {
            warm_up: Duration::ZERO,
            attempts,
            interval: Duration::ZERO,
        }
    }
}

fn default_link_config() -> PathBuf {
    PathBuf::from("/etc/gwctl/link.conf")
}

fn default_unmanaged_config() -> PathBuf {
    PathBuf::from("/etc/NetworkManager/conf.d/unmanaged.conf")
}

fn default_modem_profile() -> PathBuf {
    PathBuf::from("/etc/gwctl/modem.conf")
}

fn default_modem_device() -> PathBuf {
    PathBuf::from("/dev/cdc-wdm0")
}

fn default_primary_device() -> String {
    "eth0".to_string()
}

fn default_service() -> String {
    "NetworkManager".to_string()
}

fn default_sim_settle_ms() -> u64 {
    2000
}

fn default_warm_up_ms() -> u64 {
    10_000
}

fn default_poll_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_remount_rw() -> Vec<String> {
    ["mount", "-o", "remount,rw", "/"].iter().map(|s| s.to_string()).collect()
}

fn default_remount_ro() -> Vec<String> {
    ["mount", "-o", "remount,ro", "/"].iter().map(|s| s.to_string()).collect()
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            link_config: default_link_config(),
            unmanaged_config: default_unmanaged_config(),
            modem_profile: default_modem_profile(),
            modem_device: default_modem_device(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            primary_device: default_primary_device(),
            service: default_service(),
        }
    }
}

impl Default for ModemSettings {
    fn default() -> Self {
        Self {
            sim_settle_ms: default_sim_settle_ms(),
            warm_up_ms: default_warm_up_ms(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for RootSettings {
    fn default() -> Self {
        Self {
            remount_rw: default_remount_rw(),
            remount_ro: default_remount_ro(),
        }
    }
}

impl ModemSettings {
    pub fn sim_settle(&self) -> Duration {
        Duration::from_millis(self.sim_settle_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            warm_up: Duration::from_millis(self.warm_up_ms),
            attempts: self.poll_attempts,
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl GwctlConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> GwctlResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GwctlError::ConfigError(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| GwctlError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> GwctlResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> GwctlResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GwctlError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| GwctlError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Validate values serde cannot check on its own
    pub fn validate(&self) -> GwctlResult<()> {
        if self.root.remount_rw.is_empty() || self.root.remount_ro.is_empty() {
            return Err(GwctlError::ConfigError(
                "remount commands must not be empty".to_string(),
            ));
        }
        if self.network.service.is_empty() {
            return Err(GwctlError::ConfigError("network service name is empty".to_string()));
        }
        Ok(())
    }
}
