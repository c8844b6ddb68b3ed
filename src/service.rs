//! Network manager service control

use crate::command::{CommandResult, Executor};
use crate::error::GwctlResult;
use tracing::info;

/// The systemd unit that owns the links
pub struct ManagerService {
    executor: Executor,
    unit: String,
}

impl ManagerService {
    pub fn new(executor: Executor, unit: impl Into<String>) -> Self {
        Self {
            executor,
            unit: unit.into(),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// `systemctl restart <unit>`
    pub async fn restart(&self) -> GwctlResult<CommandResult> {
        info!(unit = %self.unit, "Restarting network manager");
        self.executor.run(&["systemctl", "restart", self.unit.as_str()]).await
    }
}
