//! Cellular modem connection management
//!
//! `set_modem` persists a profile and creates (or updates) the network
//! manager connection for it. `autostart` runs once at boot: it waits for
//! the modem device node and re-establishes the stored connection.

use crate::command::{CommandResult, Executor};
use crate::config::RetryPolicy;
use crate::config_store::{ConfigStore, ModemProfile};
use crate::error::GwctlResult;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Connection parameters; empty optional strings count as absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemRequest {
    pub connection_name: String,
    pub apn: String,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl From<&ModemProfile> for ModemRequest {
    fn from(profile: &ModemProfile) -> Self {
        Self {
            connection_name: profile.connection_name.clone(),
            apn: profile.apn.clone(),
            pin: profile.pin.clone(),
            username: profile.username.clone(),
            password: profile.password.clone(),
        }
    }
}

impl ModemRequest {
    /// Required fields present, nothing that could break the profile file
    pub fn validate(&self) -> GwctlResult<()> {
        validation::require("Connection name", &self.connection_name)?;
        validation::require("APN", &self.apn)?;
        for (field, value) in [
            ("Connection name", Some(self.connection_name.as_str())),
            ("APN", Some(self.apn.as_str())),
            ("PIN", validation::optional(self.pin.as_deref())),
            ("User", validation::optional(self.username.as_deref())),
            ("Password", validation::optional(self.password.as_deref())),
        ] {
            if let Some(value) = value {
                validation::sanitize_config_value(field, value)?;
            }
        }
        Ok(())
    }
}

/// Commands issued by `set_modem`
#[derive(Debug, Clone, Serialize)]
pub struct ModemOutcome {
    /// SIM unlock, when a PIN was given
    pub unlock: Option<CommandResult>,
    /// `nmcli connection add` or `modify`
    pub profile: CommandResult,
    /// `nmcli connection up`
    pub activate: CommandResult,
}

impl ModemOutcome {
    pub fn success(&self) -> bool {
        self.profile.success() && self.activate.success()
    }
}

/// How the boot-time autostart ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AutostartOutcome {
    /// Device found, stored profile applied
    Connected { outcome: ModemOutcome },
    /// Device found, nothing stored
    NoProfile,
    /// Device found, stored profile has auto-reconnect off
    Disabled,
    /// Device node never appeared
    DeviceMissing,
    /// Device found but reading or applying the profile failed
    Failed { reason: String },
}

pub struct ModemManager {
    executor: Executor,
    store: Arc<ConfigStore>,
    device_node: PathBuf,
    sim_settle: Duration,
}

impl ModemManager {
    pub fn new(executor: Executor, store: Arc<ConfigStore>, device_node: PathBuf, sim_settle: Duration) -> Self {
        Self {
            executor,
            store,
            device_node,
            sim_settle,
        }
    }

    /// Persist the profile and bring the cellular connection up
    pub async fn set_modem(&self, request: &ModemRequest) -> GwctlResult<ModemOutcome> {
        request.validate()?;
        let pin = validation::optional(request.pin.as_deref());
        let username = validation::optional(request.username.as_deref());
        let password = validation::optional(request.password.as_deref());

        let name = request.connection_name.as_str();
        info!(connection = name, apn = %request.apn, "Configuring modem");

        let unlock = match pin {
            Some(pin) => Some(self.unlock_sim(pin).await?),
            None => None,
        };

        let profile = ModemProfile {
            connection_name: name.to_string(),
            apn: request.apn.clone(),
            pin: pin.map(String::from),
            username: username.map(String::from),
            password: password.map(String::from),
            auto_reconnect: true,
        };
        self.store.write_modem_profile(&profile).await?;

        let profile_result = if self.connection_exists(name).await {
            debug!(connection = name, "Connection exists, updating");
            let args = modify_args(&profile);
            self.executor.run(&args).await?
        } else {
            let args = add_args(&profile);
            self.executor.run(&args).await?
        };

        let activate = self.executor.run(&["nmcli", "connection", "up", name]).await?;
        if profile_result.success() && !activate.success() {
            warn!(connection = name, "Connection profile present but not active");
        }

        Ok(ModemOutcome {
            unlock,
            profile: profile_result,
            activate,
        })
    }

    /// Boot-time reconnect; never fails, the outcome is logged and returned
    pub async fn autostart(&self, policy: &RetryPolicy) -> AutostartOutcome {
        info!(device = %self.device_node.display(), attempts = policy.attempts, "Modem autostart");
        sleep(policy.warm_up).await;

        for attempt in 1..=policy.attempts {
            if self.device_node.exists() {
                debug!(attempt, "Modem device present");
                return self.reconnect().await;
            }

            debug!(attempt, "Modem device not present yet");
            if attempt < policy.attempts {
                sleep(policy.interval).await;
            }
        }

        warn!(
            device = %self.device_node.display(),
            attempts = policy.attempts,
            "Modem device never appeared, autostart gave up"
        );
        AutostartOutcome::DeviceMissing
    }

    async fn reconnect(&self) -> AutostartOutcome {
        let profile = match self.store.modem_profile().await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                info!("No stored modem profile");
                return AutostartOutcome::NoProfile;
            }
            Err(e) => {
                error!(error = %e, "Could not read modem profile");
                return AutostartOutcome::Failed { reason: e.to_string() };
            }
        };

        if !profile.auto_reconnect {
            info!(connection = %profile.connection_name, "Auto-reconnect disabled");
            return AutostartOutcome::Disabled;
        }

        match self.set_modem(&ModemRequest::from(&profile)).await {
            Ok(outcome) => {
                info!(connection = %profile.connection_name, success = outcome.success(), "Modem autostart done");
                AutostartOutcome::Connected { outcome }
            }
            Err(e) => {
                error!(error = %e, "Modem autostart failed");
                AutostartOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    /// Unlock the SIM and give the modem time to settle
    ///
    /// Unlock and connection creation are not atomic; the settle delay is
    /// all that keeps them from racing.
    async fn unlock_sim(&self, pin: &str) -> GwctlResult<CommandResult> {
        let pin_arg = format!("--pin={}", pin);
        let result = self.executor.run(&["mmcli", "-m", "any", pin_arg.as_str()]).await?;
        if !result.success() {
            warn!("SIM unlock failed, continuing");
        }
        sleep(self.sim_settle).await;
        Ok(result)
    }

    async fn connection_exists(&self, name: &str) -> bool {
        match self.executor.run(&["nmcli", "-t", "-f", "NAME", "connection", "show"]).await {
            Ok(result) if result.success() => result.stdout_str().lines().any(|l| l.trim() == name),
            _ => false,
        }
    }
}

fn add_args(profile: &ModemProfile) -> Vec<String> {
    let mut args: Vec<String> = [
        "nmcli", "connection", "add", "type", "gsm", "ifname", "*", "con-name",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(profile.connection_name.clone());
    args.push("apn".to_string());
    args.push(profile.apn.clone());
    for (key, value) in [
        ("gsm.username", &profile.username),
        ("gsm.password", &profile.password),
        ("gsm.pin", &profile.pin),
    ] {
        if let Some(value) = value {
            args.push(key.to_string());
            args.push(value.clone());
        }
    }
    args.push("connection.autoconnect".to_string());
    args.push("yes".to_string());
    args
}

fn modify_args(profile: &ModemProfile) -> Vec<String> {
    let mut args: Vec<String> = ["nmcli", "connection", "modify"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(profile.connection_name.clone());
    for (key, value) in [
        ("gsm.apn", Some(&profile.apn)),
        ("gsm.username", profile.username.as_ref()),
        ("gsm.password", profile.password.as_ref()),
        ("gsm.pin", profile.pin.as_ref()),
    ] {
        // An empty value clears a previously stored credential
        args.push(key.to_string());
        args.push(value.cloned().unwrap_or_default());
    }
    args.push("connection.autoconnect".to_string());
    args.push("yes".to_string());
    args
}
