//! Persisted gateway configuration
//!
//! Typed read/modify/write access to the three section files the gateway
//! owns: the link network config, the unmanaged-device list and the modem
//! profile. Files are line-oriented `[section]` / `key = value` text. Writes
//! always reread the file, upsert the given keys and write it back in full
//! inside a writable-root window; unrelated lines are kept as they were.

use crate::config::ConfigPaths;
use crate::error::{GwctlError, GwctlResult};
use crate::writable_root::WritableRoot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

pub const SECTION_NETWORK: &str = "Network";
pub const SECTION_DHCP_SERVER: &str = "DHCPServer";
pub const SECTION_KEYFILE: &str = "keyfile";
pub const SECTION_MODEM: &str = "Modem";

pub const KEY_ADDRESS: &str = "Address";
pub const KEY_DHCP_CLIENT: &str = "DHCPClientEnabled";
pub const KEY_DHCP_SERVER: &str = "DHCPServerEnabled";
pub const KEY_POOL_OFFSET: &str = "PoolOffset";
pub const KEY_POOL_SIZE: &str = "PoolSize";
pub const KEY_LEASE_TIME: &str = "LeaseTimeSeconds";
pub const KEY_DOMAIN_NAME: &str = "DomainName";
pub const KEY_UNMANAGED_DEVICES: &str = "unmanaged-devices";

const UNMANAGED_NONE: &str = "None";

/// The files owned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFile {
    /// `[Network]` and `[DHCPServer]`
    Link,
    /// `[keyfile]` unmanaged-devices
    Unmanaged,
    /// `[Modem]`
    Modem,
}

/// Link network configuration as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLinkConfig {
    /// `ip/prefixlen`, empty when unset
    pub address: String,
    pub dhcp_client_enabled: bool,
    pub dhcp_server_enabled: bool,
    pub pool_offset: Option<u32>,
    pub pool_size: Option<u32>,
    pub lease_time_seconds: Option<u32>,
    pub domain_name: Option<String>,
}

/// Whether the primary interface is excluded from automatic management
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmanagedState {
    pub unmanaged: bool,
}

/// Cellular connection profile kept across reboots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemProfile {
    pub connection_name: String,
    pub apn: String,
    pub pin: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auto_reconnect: bool,
}

// === Section document ===

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Section(String),
    Entry { key: String, value: String },
    Other(String),
}

/// Parsed section file that renders back with unknown lines untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionDocument {
    lines: Vec<Line>,
}

impl SectionDocument {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|raw| {
                let line = raw.trim();
                if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
                    Line::Section(line[1..line.len() - 1].trim().to_string())
                } else if line.starts_with('#') || line.starts_with(';') {
                    Line::Other(raw.to_string())
                } else if let Some((key, value)) = line.split_once('=') {
                    Line::Entry {
                        key: key.trim().to_string(),
                        value: value.trim().to_string(),
                    }
                } else {
                    Line::Other(raw.to_string())
                }
            })
            .collect();

        Self { lines }
    }

    /// All `key = value` pairs of `section`; later duplicates win
    pub fn section(&self, section: &str) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        let mut current: Option<&str> = None;
        for line in &self.lines {
            match line {
                Line::Section(name) => current = Some(name.as_str()),
                Line::Entry { key, value } if current == Some(section) => {
                    values.insert(key.clone(), value.clone());
                }
                _ => {}
            }
        }
        values
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.lines
            .iter()
            .any(|l| matches!(l, Line::Section(name) if name == section))
    }

    /// Replace `key` in `section`, or add it at the end of the section
    pub fn upsert(&mut self, section: &str, key: &str, value: &str) {
        let mut current: Option<&str> = None;
        let mut existing = None;
        let mut insert_at = None;

        for (idx, line) in self.lines.iter().enumerate() {
            match line {
                Line::Section(name) => {
                    current = Some(name.as_str());
                    if name == section {
                        insert_at = Some(idx + 1);
                    }
                }
                Line::Entry { key: k, .. } if current == Some(section) => {
                    insert_at = Some(idx + 1);
                    // Last duplicate is the one readers see
                    if k == key {
                        existing = Some(idx);
                    }
                }
                _ => {}
            }
        }

        let entry = Line::Entry {
            key: key.to_string(),
            value: value.to_string(),
        };

        match (existing, insert_at) {
            (Some(idx), _) => self.lines[idx] = entry,
            (None, Some(idx)) => self.lines.insert(idx, entry),
            (None, None) => {
                if matches!(self.lines.last(), Some(l) if *l != Line::Other(String::new())) {
                    self.lines.push(Line::Other(String::new()));
                }
                self.lines.push(Line::Section(section.to_string()));
                self.lines.push(entry);
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Section(name) => out.push_str(&format!("[{}]", name)),
                Line::Entry { key, value } if value.is_empty() => out.push_str(&format!("{} =", key)),
                Line::Entry { key, value } => out.push_str(&format!("{} = {}", key, value)),
                Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }
}

// === Store ===

/// Sole owner of the on-disk gateway configuration
pub struct ConfigStore {
    root: Arc<WritableRoot>,
    paths: ConfigPaths,
}

impl ConfigStore {
    pub fn new(root: Arc<WritableRoot>, paths: ConfigPaths) -> Self {
        Self { root, paths }
    }

    pub fn path(&self, file: ConfigFile) -> &Path {
        match file {
            ConfigFile::Link => &self.paths.link_config,
            ConfigFile::Unmanaged => &self.paths.unmanaged_config,
            ConfigFile::Modem => &self.paths.modem_profile,
        }
    }

    /// Read one section
    ///
    /// Fails with [`GwctlError::ConfigNotFound`] if the file does not exist.
    pub async fn read_section(&self, file: ConfigFile, section: &str) -> GwctlResult<BTreeMap<String, String>> {
        Ok(self.read_document(file).await?.section(section))
    }

    /// Upsert `updates` into `section`
    pub async fn write_keys(&self, file: ConfigFile, section: &str, updates: &[(&str, &str)]) -> GwctlResult<()> {
        self.write_sections(file, &[(section, updates)]).await
    }

    /// Upsert into several sections of one file within a single window
    pub async fn write_sections(&self, file: ConfigFile, changes: &[(&str, &[(&str, &str)])]) -> GwctlResult<()> {
        let path = self.path(file);
        self.root
            .with_writable_root(|| rewrite_document(path, changes))
            .await
    }

    async fn read_document(&self, file: ConfigFile) -> GwctlResult<SectionDocument> {
        let path = self.path(file);
        match fs::read_to_string(path).await {
            Ok(text) => Ok(SectionDocument::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GwctlError::ConfigNotFound(PathBuf::from(path)))
            }
            Err(e) => Err(GwctlError::Io(e)),
        }
    }

    // === Typed access ===

    pub async fn link_config(&self) -> GwctlResult<NetworkLinkConfig> {
        let doc = self.read_document(ConfigFile::Link).await?;
        let network = doc.section(SECTION_NETWORK);
        let dhcp = doc.section(SECTION_DHCP_SERVER);

        Ok(NetworkLinkConfig {
            address: network.get(KEY_ADDRESS).cloned().unwrap_or_default(),
            dhcp_client_enabled: parse_flag(network.get(KEY_DHCP_CLIENT)),
            dhcp_server_enabled: parse_flag(network.get(KEY_DHCP_SERVER)),
            pool_offset: dhcp.get(KEY_POOL_OFFSET).and_then(|v| v.parse().ok()),
            pool_size: dhcp.get(KEY_POOL_SIZE).and_then(|v| v.parse().ok()),
            lease_time_seconds: dhcp.get(KEY_LEASE_TIME).and_then(|v| v.parse().ok()),
            domain_name: dhcp.get(KEY_DOMAIN_NAME).filter(|v| !v.is_empty()).cloned(),
        })
    }

    pub async fn set_address(&self, address: &str) -> GwctlResult<()> {
        info!(address, "Persisting link address");
        self.write_keys(ConfigFile::Link, SECTION_NETWORK, &[(KEY_ADDRESS, address)])
            .await
    }

    pub async fn unmanaged_state(&self, device: &str) -> GwctlResult<UnmanagedState> {
        let section = match self.read_section(ConfigFile::Unmanaged, SECTION_KEYFILE).await {
            Ok(section) => section,
            Err(GwctlError::ConfigNotFound(_)) => return Ok(UnmanagedState::default()),
            Err(e) => return Err(e),
        };
        let unmanaged = section
            .get(KEY_UNMANAGED_DEVICES)
            .map(|v| *v == unmanaged_value(device))
            .unwrap_or(false);
        Ok(UnmanagedState { unmanaged })
    }

    pub async fn set_unmanaged(&self, device: &str, unmanaged: bool) -> GwctlResult<()> {
        let value = if unmanaged {
            unmanaged_value(device)
        } else {
            UNMANAGED_NONE.to_string()
        };
        debug!(device, unmanaged, "Updating unmanaged devices");
        self.write_keys(
            ConfigFile::Unmanaged,
            SECTION_KEYFILE,
            &[(KEY_UNMANAGED_DEVICES, value.as_str())],
        )
        .await
    }

    /// Stored modem profile, `None` if nothing usable was persisted
    pub async fn modem_profile(&self) -> GwctlResult<Option<ModemProfile>> {
        let section = match self.read_section(ConfigFile::Modem, SECTION_MODEM).await {
            Ok(section) => section,
            Err(GwctlError::ConfigNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let field = |key: &str| section.get(key).filter(|v| !v.is_empty()).cloned();
        let (Some(connection_name), Some(apn)) = (field("ConnectionName"), field("Apn")) else {
            return Ok(None);
        };

        Ok(Some(ModemProfile {
            connection_name,
            apn,
            pin: field("Pin"),
            username: field("User"),
            password: field("Password"),
            auto_reconnect: parse_flag(section.get("Autoreconnect")),
        }))
    }

    /// Create or update the modem profile in place
    pub async fn write_modem_profile(&self, profile: &ModemProfile) -> GwctlResult<()> {
        info!(connection = %profile.connection_name, "Persisting modem profile");
        let auto = flag(profile.auto_reconnect);
        self.write_keys(
            ConfigFile::Modem,
            SECTION_MODEM,
            &[
                ("ConnectionName", profile.connection_name.as_str()),
                ("Apn", profile.apn.as_str()),
                ("Pin", profile.pin.as_deref().unwrap_or("")),
                ("User", profile.username.as_deref().unwrap_or("")),
                ("Password", profile.password.as_deref().unwrap_or("")),
                ("Autoreconnect", auto),
            ],
        )
        .await
    }
}

async fn rewrite_document(path: &Path, changes: &[(&str, &[(&str, &str)])]) -> GwctlResult<()> {
    let mut doc = match fs::read_to_string(path).await {
        Ok(text) => SectionDocument::parse(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SectionDocument::default(),
        Err(e) => return Err(GwctlError::Io(e)),
    };

    for (section, updates) in changes {
        for (key, value) in updates.iter() {
            doc.upsert(section, key, value);
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, doc.render()).await?;
    debug!(path = %path.display(), "Config file written");
    Ok(())
}

pub(crate) fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn parse_flag(value: Option<&String>) -> bool {
    matches!(
        value.map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("true" | "yes" | "1")
    )
}

fn unmanaged_value(device: &str) -> String {
    format!("interface-name:{}", device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootSettings;
    use crate::testing::RecordingRunner;
    use tempfile::TempDir;

    fn store(dir: &TempDir, runner: &Arc<RecordingRunner>) -> ConfigStore {
        let root = Arc::new(WritableRoot::new(runner.executor(), &RootSettings::default()));
        let paths = ConfigPaths {
            link_config: dir.path().join("link.conf"),
            unmanaged_config: dir.path().join("nm/conf.d/unmanaged.conf"),
            modem_profile: dir.path().join("modem.conf"),
            modem_device: dir.path().join("cdc-wdm0"),
        };
        ConfigStore::new(root, paths)
    }

    #[test]
    fn test_document_parse_and_upsert() {
        let mut doc = SectionDocument::parse(
            "# managed by gwctl\n[Network]\nAddress=10.0.0.1/24\n\n[DHCPServer]\nPoolSize = 10\n",
        );
        assert_eq!(doc.section("Network").get("Address").unwrap(), "10.0.0.1/24");

        doc.upsert("Network", "Address", "10.0.0.2/24");
        doc.upsert("Network", "DHCPClientEnabled", "false");
        doc.upsert("Extra", "Key", "v");

        assert_eq!(
            doc.render(),
            "# managed by gwctl\n[Network]\nAddress = 10.0.0.2/24\nDHCPClientEnabled = false\n\n\
             [DHCPServer]\nPoolSize = 10\n\n[Extra]\nKey = v\n"
        );
    }

    #[test]
    fn test_upsert_targets_the_entry_readers_see() {
        let mut doc = SectionDocument::parse(
            "[Network]\nAddress = 1.1.1.1/24\n[Network]\nAddress = 2.2.2.2/24\n",
        );
        doc.upsert("Network", "Address", "3.3.3.3/24");

        assert_eq!(doc.section("Network").get("Address").unwrap(), "3.3.3.3/24");
        assert_eq!(
            doc.render(),
            "[Network]\nAddress = 1.1.1.1/24\n[Network]\nAddress = 3.3.3.3/24\n"
        );
    }

    #[test]
    fn test_empty_value_round_trips() {
        let mut doc = SectionDocument::parse("[DHCPServer]\nLeaseTimeSeconds = 3600\n");
        doc.upsert("DHCPServer", "LeaseTimeSeconds", "");

        assert_eq!(doc.render(), "[DHCPServer]\nLeaseTimeSeconds =\n");
        let reparsed = SectionDocument::parse(&doc.render());
        assert_eq!(reparsed.section("DHCPServer").get("LeaseTimeSeconds").unwrap(), "");
    }

    #[test]
    fn test_document_keys_are_per_section() {
        let doc = SectionDocument::parse("[A]\nk = 1\n[B]\nk = 2\n");
        assert_eq!(doc.section("A").get("k").unwrap(), "1");
        assert_eq!(doc.section("B").get("k").unwrap(), "2");
        assert!(doc.section("C").is_empty());
        assert!(doc.has_section("B"));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_config_not_found() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let store = store(&dir, &runner);

        let err = store.read_section(ConfigFile::Link, SECTION_NETWORK).await.unwrap_err();
        assert!(matches!(err, GwctlError::ConfigNotFound(_)));
    }

    #[tokio::test]
    async fn test_absent_keys_are_absent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("link.conf"), "[Network]\nAddress = 1.2.3.4/8\n").unwrap();
        let runner = RecordingRunner::new();
        let store = store(&dir, &runner);

        let section = store.read_section(ConfigFile::Link, SECTION_NETWORK).await.unwrap();
        assert_eq!(section.len(), 1);
        assert!(section.get(KEY_DHCP_CLIENT).is_none());
    }

    #[tokio::test]
    async fn test_write_keys_creates_file_inside_window() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let store = store(&dir, &runner);

        store.set_unmanaged("eth0", true).await.unwrap();

        assert_eq!(runner.calls(), vec!["mount -o remount,rw /", "mount -o remount,ro /"]);
        assert!(store.unmanaged_state("eth0").await.unwrap().unmanaged);
        assert!(!store.unmanaged_state("eth1").await.unwrap().unmanaged);

        store.set_unmanaged("eth0", false).await.unwrap();
        let section = store.read_section(ConfigFile::Unmanaged, SECTION_KEYFILE).await.unwrap();
        assert_eq!(section.get(KEY_UNMANAGED_DEVICES).unwrap(), "None");
    }

    #[tokio::test]
    async fn test_write_preserves_unrelated_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("link.conf");
        std::fs::write(&path, "; vendor\n[Match]\nName=eth0\n[Network]\nDNS=1.1.1.1\n").unwrap();
        let runner = RecordingRunner::new();
        let store = store(&dir, &runner);

        store.set_address("192.168.1.1/24").await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("; vendor\n[Match]\nName = eth0\n"));
        let config = store.link_config().await.unwrap();
        assert_eq!(config.address, "192.168.1.1/24");
        let network = store.read_section(ConfigFile::Link, SECTION_NETWORK).await.unwrap();
        assert_eq!(network.get("DNS").unwrap(), "1.1.1.1");
    }

    #[tokio::test]
    async fn test_modem_profile_upsert() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let store = store(&dir, &runner);
        assert!(store.modem_profile().await.unwrap().is_none());

        let mut profile = ModemProfile {
            connection_name: "lte".into(),
            apn: "internet".into(),
            pin: Some("1234".into()),
            username: None,
            password: None,
            auto_reconnect: true,
        };
        store.write_modem_profile(&profile).await.unwrap();
        profile.apn = "iot.example".into();
        profile.pin = None;
        store.write_modem_profile(&profile).await.unwrap();

        assert_eq!(store.modem_profile().await.unwrap(), Some(profile));
        let text = std::fs::read_to_string(dir.path().join("modem.conf")).unwrap();
        assert_eq!(text.matches("[Modem]").count(), 1);
        assert_eq!(text.matches("Apn =").count(), 1);
    }
}
