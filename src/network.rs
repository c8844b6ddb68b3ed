//! Network identity reconciliation
//!
//! Hostname, link MTU and the primary IPv4 address. Address changes diff
//! against the address the kernel reports right now, not against the
//! persisted file, and run inside an unmanaged window so the network manager
//! does not undo the manual change while it is applied.

use crate::command::{CommandResult, Executor};
use crate::config_store::ConfigStore;
use crate::error::{GwctlError, GwctlResult};
use crate::service::ManagerService;
use crate::validation;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// IPv4 address with prefix length, `a.b.c.d/len`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv4Cidr {
    pub address: Ipv4Addr,
    pub prefix: u8,
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = GwctlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = s
            .split_once('/')
            .ok_or_else(|| GwctlError::ParseError(format!("missing prefix length: {}", s)))?;
        let address = address
            .parse()
            .map_err(|_| GwctlError::ParseError(format!("invalid IPv4 address: {}", address)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| GwctlError::ParseError(format!("invalid prefix length: {}", prefix)))?;
        if prefix > 32 {
            return Err(GwctlError::ParseError(format!("prefix length out of range: {}", prefix)));
        }
        Ok(Self { address, prefix })
    }
}

/// What `set_ipv4` found and did
#[derive(Debug, Clone, Serialize)]
pub struct Ipv4Change {
    pub device: String,
    /// Address bound to the device before the change
    pub previous: Option<Ipv4Cidr>,
    pub target: Ipv4Cidr,
    /// False when live and persisted state already matched the target
    pub changed: bool,
    /// True when the target is bound to the device afterwards
    pub applied: bool,
    /// Every command issued, in order
    pub commands: Vec<CommandResult>,
}

/// Extract the first `inet a.b.c.d/len` from `ip addr show` output
pub fn parse_ipv4_from_addr_show(output: &str) -> Option<Ipv4Cidr> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("inet") => fields.next()?.parse().ok(),
            _ => None,
        }
    })
}

pub struct NetworkReconciler {
    executor: Executor,
    store: Arc<ConfigStore>,
    service: Arc<ManagerService>,
}

impl NetworkReconciler {
    pub fn new(executor: Executor, store: Arc<ConfigStore>, service: Arc<ManagerService>) -> Self {
        Self {
            executor,
            store,
            service,
        }
    }

    /// Set the system hostname
    ///
    /// A failing tool is reported in the result; nothing is rolled back.
    pub async fn set_hostname(&self, name: &str) -> GwctlResult<CommandResult> {
        validation::require("Hostname", name)?;
        validation::sanitize_config_value("Hostname", name)?;

        info!(hostname = name, "Setting hostname");
        self.executor.run(&["hostnamectl", "set-hostname", name]).await
    }

    /// Set the link MTU of `device`
    pub async fn set_mtu(&self, mtu: &str, device: &str) -> GwctlResult<CommandResult> {
        validation::require("MTU", mtu)?;
        validation::validate_interface_name(device)?;
        let mtu = validation::validate_mtu(mtu)?.to_string();

        info!(device, mtu = %mtu, "Setting MTU");
        self.executor.run(&["ip", "link", "set", device, "mtu", mtu.as_str()]).await
    }

    /// Address currently bound to `device`
    ///
    /// Launch failures, non-zero exits and unparsable output all mean
    /// "no address".
    pub async fn current_ipv4(&self, device: &str) -> Option<Ipv4Cidr> {
        let result = match self.executor.run(&["ip", "addr", "show", device]).await {
            Ok(result) => result,
            Err(e) => {
                debug!(device, error = %e, "Address query not issued");
                return None;
            }
        };
        if !result.success() {
            debug!(device, "Address query failed, assuming no address");
            return None;
        }
        parse_ipv4_from_addr_show(&result.stdout_str())
    }

    /// Reconcile the IPv4 address of `device` to `address`/`netmask`
    pub async fn set_ipv4(&self, address: &str, netmask: &str, device: &str) -> GwctlResult<Ipv4Change> {
        validation::require("Address", address)?;
        validation::require("Netmask", netmask)?;
        validation::require("Device", device)?;
        let ip = validation::validate_ipv4_address(address)?;
        let prefix = validation::netmask_to_prefix(netmask)?;
        validation::validate_interface_name(device)?;

        let target = Ipv4Cidr { address: ip, prefix };
        let previous = self.current_ipv4(device).await;
        let persisted = match self.store.link_config().await {
            Ok(config) => config.address,
            Err(GwctlError::ConfigNotFound(_)) => String::new(),
            Err(e) => return Err(e),
        };

        let mut change = Ipv4Change {
            device: device.to_string(),
            previous,
            target,
            changed: false,
            applied: false,
            commands: Vec::new(),
        };

        if previous == Some(target) && persisted == target.to_string() {
            info!(device, address = %target, "Address already configured");
            change.applied = true;
            return Ok(change);
        }

        info!(device, from = ?previous.map(|p| p.to_string()), to = %target, "Changing address");
        change.changed = true;
        self.store.set_address(&target.to_string()).await?;

        change.commands = self
            .unmanaged_window(device, || self.replace_address(device, previous, target))
            .await?;

        change.applied = change
            .commands
            .iter()
            .any(|c| c.success() && c.args.get(2).map(String::as_str) == Some("add"));
        if !change.applied {
            warn!(
                device,
                address = %target,
                "Address persisted but not applied; live state differs until the next service restart"
            );
        }

        Ok(change)
    }

    /// Delete the old address (if any), then add the new one
    async fn replace_address(
        &self,
        device: &str,
        previous: Option<Ipv4Cidr>,
        target: Ipv4Cidr,
    ) -> GwctlResult<Vec<CommandResult>> {
        let mut issued = Vec::new();

        if let Some(old) = previous {
            let old = old.to_string();
            let del = self.executor.run(&["ip", "addr", "del", old.as_str(), "dev", device]).await?;
            let deleted = del.success();
            issued.push(del);
            if !deleted {
                // Adding now would leave two addresses on the link.
                warn!(device, address = %old, "Could not delete current address, not adding new one");
                return Ok(issued);
            }
        }

        let new = target.to_string();
        issued.push(self.executor.run(&["ip", "addr", "add", new.as_str(), "dev", device]).await?);
        Ok(issued)
    }

    /// Run `body` with `device` excluded from automatic management
    ///
    /// Marks the device unmanaged and restarts the service, runs `body`,
    /// then always clears the mark and restarts again. Each file change is
    /// its own writable-root window.
    async fn unmanaged_window<F, Fut>(&self, device: &str, body: F) -> GwctlResult<Vec<CommandResult>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GwctlResult<Vec<CommandResult>>>,
    {
        self.store.set_unmanaged(device, true).await?;

        let mut issued = Vec::new();
        let outcome = match self.service.restart().await {
            Ok(restart) => {
                issued.push(restart);
                body().await
            }
            Err(e) => Err(e),
        };

        let released = self.store.set_unmanaged(device, false).await;
        let restarted = self.service.restart().await;

        let mut body_commands = outcome?;
        issued.append(&mut body_commands);
        released?;
        issued.push(restarted?);
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, RootSettings};
    use crate::config_store::{ConfigFile, KEY_UNMANAGED_DEVICES, SECTION_KEYFILE};
    use crate::testing::RecordingRunner;
    use crate::writable_root::WritableRoot;
    use tempfile::TempDir;

    const ADDR_SHOW: &str = "2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP\n    \
        link/ether 52:54:00:12:34:56 brd ff:ff:ff:ff:ff:ff\n    \
        inet 192.168.1.20/24 brd 192.168.1.255 scope global eth0\n       \
        valid_lft forever preferred_lft forever\n    \
        inet6 fe80::5054:ff:fe12:3456/64 scope link\n";

    struct Fixture {
        _dir: TempDir,
        runner: Arc<RecordingRunner>,
        store: Arc<ConfigStore>,
        reconciler: NetworkReconciler,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let root = Arc::new(WritableRoot::new(runner.executor(), &RootSettings::default()));
        let paths = ConfigPaths {
            link_config: dir.path().join("link.conf"),
            unmanaged_config: dir.path().join("unmanaged.conf"),
            modem_profile: dir.path().join("modem.conf"),
            modem_device: dir.path().join("cdc-wdm0"),
        };
        let store = Arc::new(ConfigStore::new(root, paths));
        let service = Arc::new(ManagerService::new(runner.executor(), "NetworkManager"));
        let reconciler = NetworkReconciler::new(runner.executor(), store.clone(), service);
        Fixture {
            _dir: dir,
            runner,
            store,
            reconciler,
        }
    }

    #[test]
    fn test_parse_addr_show() {
        let cidr = parse_ipv4_from_addr_show(ADDR_SHOW).unwrap();
        assert_eq!(cidr.to_string(), "192.168.1.20/24");
        assert!(parse_ipv4_from_addr_show("garbage\ninet nonsense\n").is_none());
        assert!(parse_ipv4_from_addr_show("").is_none());
    }

    #[tokio::test]
    async fn test_empty_required_fields_issue_no_commands() {
        let f = fixture();
        let r = &f.reconciler;

        assert!(r.set_hostname("").await.unwrap_err().is_invalid_argument());
        assert!(r.set_mtu("", "eth0").await.unwrap_err().is_invalid_argument());
        assert!(r.set_mtu("1500", "").await.unwrap_err().is_invalid_argument());
        assert!(r.set_ipv4("", "24", "eth0").await.unwrap_err().is_invalid_argument());
        assert!(r.set_ipv4("10.0.0.5", "", "eth0").await.unwrap_err().is_invalid_argument());
        assert!(r.set_ipv4("10.0.0.5", "24", "").await.unwrap_err().is_invalid_argument());

        assert!(f.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_set_hostname_and_mtu_commands() {
        let f = fixture();
        f.reconciler.set_hostname("new_hostname").await.unwrap();
        f.reconciler.set_mtu("1400", "eth0").await.unwrap();

        assert_eq!(
            f.runner.calls(),
            vec!["hostnamectl set-hostname new_hostname", "ip link set eth0 mtu 1400"]
        );
    }

    #[tokio::test]
    async fn test_failed_hostname_tool_is_returned_not_raised() {
        let f = fixture();
        f.runner.respond(&["hostnamectl"], 1, "");
        let result = f.reconciler.set_hostname("gw").await.unwrap();
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_set_ipv4_without_current_address_only_adds() {
        let f = fixture();

        let change = f.reconciler.set_ipv4("10.0.0.5", "24", "eth0").await.unwrap();

        let calls = f.runner.calls();
        assert!(calls.contains(&"ip addr add 10.0.0.5/24 dev eth0".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("ip addr del")));
        assert!(change.changed && change.applied);
        assert_eq!(change.previous, None);
        assert_eq!(f.store.link_config().await.unwrap().address, "10.0.0.5/24");
    }

    #[tokio::test]
    async fn test_set_ipv4_deletes_current_before_adding() {
        let f = fixture();
        f.runner.respond(&["ip", "addr", "show"], 0, ADDR_SHOW);

        let change = f
            .reconciler
            .set_ipv4("10.0.0.5", "255.255.255.0", "eth0")
            .await
            .unwrap();

        let del = f.runner.position("ip addr del 192.168.1.20/24 dev eth0").unwrap();
        let add = f.runner.position("ip addr add 10.0.0.5/24 dev eth0").unwrap();
        assert!(del < add);
        assert_eq!(change.previous.unwrap().to_string(), "192.168.1.20/24");
    }

    #[tokio::test]
    async fn test_set_ipv4_full_sequence() {
        let f = fixture();

        f.reconciler.set_ipv4("10.0.0.5", "24", "eth0").await.unwrap();

        let rw = "mount -o remount,rw /";
        let ro = "mount -o remount,ro /";
        let restart = "systemctl restart NetworkManager";
        assert_eq!(
            f.runner.calls(),
            vec![
                "ip addr show eth0",
                rw, ro, // Address
                rw, ro, // unmanaged on
                restart,
                "ip addr add 10.0.0.5/24 dev eth0",
                rw, ro, // unmanaged off
                restart,
            ]
        );

        let keyfile = f
            .store
            .read_section(ConfigFile::Unmanaged, SECTION_KEYFILE)
            .await
            .unwrap();
        assert_eq!(keyfile.get(KEY_UNMANAGED_DEVICES).unwrap(), "None");
    }

    #[tokio::test]
    async fn test_failed_delete_skips_add_and_still_restores() {
        let f = fixture();
        f.runner.respond(&["ip", "addr", "show"], 0, ADDR_SHOW);
        f.runner.respond(&["ip", "addr", "del"], 2, "");

        let change = f.reconciler.set_ipv4("10.0.0.5", "24", "eth0").await.unwrap();

        assert!(!change.applied);
        assert!(f.runner.position("ip addr add 10.0.0.5/24 dev eth0").is_none());
        assert_eq!(f.runner.count("systemctl restart NetworkManager"), 2);
        assert!(!f.store.unmanaged_state("eth0").await.unwrap().unmanaged);
    }

    #[tokio::test]
    async fn test_failed_add_reports_not_applied() {
        let f = fixture();
        f.runner.respond(&["ip", "addr", "add"], 2, "");

        let change = f.reconciler.set_ipv4("10.0.0.5", "24", "eth0").await.unwrap();

        assert!(change.changed);
        assert!(!change.applied);
        assert_eq!(f.store.link_config().await.unwrap().address, "10.0.0.5/24");
        assert!(!f.store.unmanaged_state("eth0").await.unwrap().unmanaged);
    }

    #[tokio::test]
    async fn test_already_configured_is_a_no_op() {
        let f = fixture();
        f.store.set_address("192.168.1.20/24").await.unwrap();
        f.runner.respond(&["ip", "addr", "show"], 0, ADDR_SHOW);
        let before = f.runner.calls().len();

        let change = f.reconciler.set_ipv4("192.168.1.20", "24", "eth0").await.unwrap();

        assert!(!change.changed);
        assert!(change.commands.is_empty());
        assert_eq!(f.runner.calls().len(), before + 1);
    }

    #[tokio::test]
    async fn test_failed_query_means_no_address() {
        let f = fixture();
        f.runner.respond(&["ip", "addr", "show"], 1, "Device \"eth9\" does not exist.");
        assert!(f.reconciler.current_ipv4("eth9").await.is_none());
    }
}
