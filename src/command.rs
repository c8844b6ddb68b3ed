//! External command execution
//!
//! Every OS tool the gateway drives goes through [`Executor::run`]. A
//! non-zero exit or a launch failure never becomes an error here: it is
//! captured in the returned [`CommandResult`] and the caller decides.

use crate::error::{GwctlError, GwctlResult};
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// Outcome of one external command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Program followed by its arguments
    pub args: Vec<String>,
    /// Exit code, `None` if the process never ran or was killed by a signal
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set when the program could not be started at all
    pub launch_error: Option<String>,
}

impl CommandResult {
    pub fn completed(args: Vec<String>, status: Option<i32>, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            args,
            status,
            stdout,
            stderr,
            launch_error: None,
        }
    }

    pub fn failed_to_launch(args: Vec<String>, error: impl Into<String>) -> Self {
        Self {
            args,
            status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            launch_error: Some(error.into()),
        }
    }

    pub fn launch_failed(&self) -> bool {
        self.launch_error.is_some()
    }

    pub fn success(&self) -> bool {
        !self.launch_failed() && self.status == Some(0)
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Argument vector joined for log lines and messages
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}

/// Process-spawning seam
///
/// `args[0]` is the program. Implementations must report every failure
/// through the returned [`CommandResult`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn launch(&self, args: &[String]) -> CommandResult;
}

/// Runs programs on the host with stdout and stderr captured
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn launch(&self, args: &[String]) -> CommandResult {
        let Some((program, rest)) = args.split_first() else {
            return CommandResult::failed_to_launch(Vec::new(), "no program given");
        };
        let output = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) => CommandResult::completed(
                args.to_vec(),
                output.status.code(),
                output.stdout,
                output.stderr,
            ),
            Err(e) => CommandResult::failed_to_launch(args.to_vec(), e.to_string()),
        }
    }
}

/// Validating, logging front of a [`CommandRunner`]
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Executor backed by [`SystemRunner`]
    pub fn system() -> Self {
        Self::new(Arc::new(SystemRunner::new()))
    }

    /// Run `args[0]` with the remaining arguments
    ///
    /// Fails only with [`GwctlError::EmptyCommand`].
    pub async fn run<S: AsRef<str>>(&self, args: &[S]) -> GwctlResult<CommandResult> {
        if args.is_empty() {
            return Err(GwctlError::EmptyCommand);
        }
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();

        debug!(command = ?args, "Running command");
        let result = self.runner.launch(&args).await;

        if let Some(ref err) = result.launch_error {
            warn!(command = ?result.args, error = %err, "Command could not be started");
        } else if result.success() {
            debug!(command = ?result.args, error = false, "Command finished");
        } else {
            warn!(
                command = ?result.args,
                error = true,
                status = ?result.status,
                stderr = %result.stderr_str(),
                "Command failed"
            );
        }

        Ok(result)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}
