//! Gateway facade
//!
//! Builds the executor, writable-root editor and config store once from a
//! [`GwctlConfig`] and hands them to the reconcilers.

use crate::command::{CommandResult, CommandRunner, Executor, SystemRunner};
use crate::config::GwctlConfig;
use crate::config_store::{ConfigStore, ModemProfile, NetworkLinkConfig};
use crate::desired_state::DesiredState;
use crate::dhcp::{DhcpMode, DhcpToggle};
use crate::error::{GwctlError, GwctlResult};
use crate::modem::{AutostartOutcome, ModemManager};
use crate::network::{Ipv4Cidr, NetworkReconciler};
use crate::service::ManagerService;
use crate::writable_root::WritableRoot;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub struct Gateway {
    config: GwctlConfig,
    store: Arc<ConfigStore>,
    network: NetworkReconciler,
    dhcp: DhcpToggle,
    modem: ModemManager,
}

/// Live and persisted state of the gateway
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub device: String,
    pub live_address: Option<Ipv4Cidr>,
    pub link_config: Option<NetworkLinkConfig>,
    pub dhcp_mode: DhcpMode,
    pub unmanaged: bool,
    /// Stored profile with secrets removed
    pub modem_profile: Option<ModemProfile>,
    pub modem_device_present: bool,
}

/// One section of a desired-state document
#[derive(Debug, Clone, Serialize)]
pub struct ApplyStep {
    pub name: &'static str,
    pub skipped: bool,
    pub commands: Vec<CommandResult>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub steps: Vec<ApplyStep>,
}

impl ApplyReport {
    pub fn success(&self) -> bool {
        self.steps
            .iter()
            .all(|s| s.commands.iter().all(CommandResult::success))
    }

    fn record(&mut self, name: &'static str, commands: Vec<CommandResult>) {
        self.steps.push(ApplyStep {
            name,
            skipped: false,
            commands,
        });
    }

    fn skip(&mut self, name: &'static str) {
        self.steps.push(ApplyStep {
            name,
            skipped: true,
            commands: Vec::new(),
        });
    }
}

impl Gateway {
    pub fn new(config: GwctlConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let executor = Executor::new(runner);
        let root = Arc::new(WritableRoot::new(executor.clone(), &config.root));
        let store = Arc::new(ConfigStore::new(root, config.paths.clone()));
        let service = Arc::new(ManagerService::new(executor.clone(), config.network.service.clone()));

        let network = NetworkReconciler::new(executor.clone(), store.clone(), service.clone());
        let dhcp = DhcpToggle::new(store.clone(), service);
        let modem = ModemManager::new(
            executor,
            store.clone(),
            config.paths.modem_device.clone(),
            config.modem.sim_settle(),
        );

        Self {
            config,
            store,
            network,
            dhcp,
            modem,
        }
    }

    /// Gateway driving the real host tools
    pub fn system(config: GwctlConfig) -> Self {
        Self::new(config, Arc::new(SystemRunner::new()))
    }

    pub fn config(&self) -> &GwctlConfig {
        &self.config
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn network(&self) -> &NetworkReconciler {
        &self.network
    }

    pub fn dhcp(&self) -> &DhcpToggle {
        &self.dhcp
    }

    pub fn modem(&self) -> &ModemManager {
        &self.modem
    }

    /// Boot-time modem reconnect on the configured schedule
    pub async fn autostart(&self) -> AutostartOutcome {
        self.modem.autostart(&self.config.modem.retry_policy()).await
    }

    pub async fn status(&self, device: Option<&str>) -> GwctlResult<GatewayStatus> {
        let device = device.unwrap_or(&self.config.network.primary_device).to_string();

        let link_config = match self.store.link_config().await {
            Ok(config) => Some(config),
            Err(GwctlError::ConfigNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let modem_profile = self.store.modem_profile().await?.map(|mut p| {
            p.pin = p.pin.map(|_| "***".to_string());
            p.password = p.password.map(|_| "***".to_string());
            p
        });

        Ok(GatewayStatus {
            live_address: self.network.current_ipv4(&device).await,
            link_config,
            dhcp_mode: self.dhcp.current_mode().await?,
            unmanaged: self.store.unmanaged_state(&device).await?.unmanaged,
            modem_profile,
            modem_device_present: self.config.paths.modem_device.exists(),
            device,
        })
    }

    /// Bring the gateway to `state`
    ///
    /// The whole document is validated first; sections run in the order
    /// hostname, MTU, address, DHCP role, modem.
    pub async fn apply(&self, state: &DesiredState) -> GwctlResult<ApplyReport> {
        state.validate()?;
        let mut report = ApplyReport::default();

        if let Some(ref hostname) = state.hostname {
            let result = self.network.set_hostname(hostname).await?;
            report.record("hostname", vec![result]);
        }

        if let Some(ref mtu) = state.mtu {
            let result = self.network.set_mtu(&mtu.value.to_string(), &mtu.device).await?;
            report.record("mtu", vec![result]);
        }

        if let Some(ref ipv4) = state.ipv4 {
            let change = self.network.set_ipv4(&ipv4.address, &ipv4.netmask, &ipv4.device).await?;
            if change.changed {
                report.record("ipv4", change.commands);
            } else {
                report.skip("ipv4");
            }
        }

        if let Some(ref dhcp) = state.dhcp {
            let current = self.dhcp.current_mode().await?;
            let unchanged = current == dhcp.mode
                && match dhcp.mode {
                    DhcpMode::Server => {
                        self.dhcp.server_settings().await? == Some(dhcp.server_settings())
                    }
                    _ => true,
                };
            if unchanged {
                report.skip("dhcp");
            } else {
                let result = match dhcp.mode {
                    DhcpMode::Server => self.dhcp.enable_dhcp_server(&dhcp.server_settings()).await?,
                    _ => self.dhcp.enable_dhcp_client().await?,
                };
                report.record("dhcp", vec![result]);
            }
        }

        if let Some(ref modem) = state.modem {
            let outcome = self.modem.set_modem(modem).await?;
            let mut commands: Vec<CommandResult> = outcome.unlock.into_iter().collect();
            commands.push(outcome.profile);
            commands.push(outcome.activate);
            report.record("modem", commands);
        }

        info!(steps = report.steps.len(), success = report.success(), "Desired state applied");
        Ok(report)
    }
}
