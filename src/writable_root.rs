//! Scoped read-write window on a read-only root filesystem
//!
//! The root filesystem is mounted read-only in normal operation. Every config
//! mutation runs inside [`WritableRoot::with_writable_root`], which remounts
//! read-write, runs the body and always remounts read-only again.

use crate::command::Executor;
use crate::config::RootSettings;
use crate::error::GwctlResult;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct WritableRoot {
    executor: Executor,
    remount_rw: Vec<String>,
    remount_ro: Vec<String>,
    // One window at a time; scopes must not be nested.
    window: Mutex<()>,
}

impl WritableRoot {
    pub fn new(executor: Executor, settings: &RootSettings) -> Self {
        Self {
            executor,
            remount_rw: settings.remount_rw.clone(),
            remount_ro: settings.remount_ro.clone(),
            window: Mutex::new(()),
        }
    }

    /// Run `f` with the root filesystem writable
    ///
    /// The read-only remount is issued exactly once after `f` finishes,
    /// whatever `f` returned. The result of `f` is passed through.
    pub async fn with_writable_root<T, F, Fut>(&self, f: F) -> GwctlResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GwctlResult<T>>,
    {
        let _window = self.window.lock().await;

        let rw = self.executor.run(&self.remount_rw).await?;
        if !rw.success() {
            warn!(command = %rw.command_line(), "Remount read-write failed, continuing");
        }
        debug!("Root filesystem writable");

        let result = f().await;

        match self.executor.run(&self.remount_ro).await {
            Ok(ro) if !ro.success() => {
                warn!(command = %ro.command_line(), "Remount read-only failed, root may stay writable");
            }
            Ok(_) => debug!("Root filesystem read-only again"),
            Err(e) => warn!(error = %e, "Remount read-only could not be issued"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GwctlError;
    use crate::testing::RecordingRunner;

    const RW: &str = "mount -o remount,rw /";
    const RO: &str = "mount -o remount,ro /";

    #[tokio::test]
    async fn test_brackets_successful_body() {
        let runner = RecordingRunner::new();
        let root = WritableRoot::new(runner.executor(), &RootSettings::default());
        let exec = runner.executor();

        let value = root
            .with_writable_root(|| async {
                exec.run(&["touch", "/etc/x"]).await?;
                Ok::<_, GwctlError>(7)
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(runner.calls(), vec![RW, "touch /etc/x", RO]);
    }

    #[tokio::test]
    async fn test_failing_body_still_remounts_read_only_once() {
        let runner = RecordingRunner::new();
        let root = WritableRoot::new(runner.executor(), &RootSettings::default());

        let result: GwctlResult<()> = root
            .with_writable_root(|| async { Err::<(), _>(GwctlError::invalid("boom")) })
            .await;

        assert!(result.unwrap_err().is_invalid_argument());
        assert_eq!(runner.count(RO), 1);
        assert!(runner.position(RW).unwrap() < runner.position(RO).unwrap());
    }

    #[tokio::test]
    async fn test_failed_rw_remount_still_releases() {
        let runner = RecordingRunner::new();
        runner.respond(&["mount", "-o", "remount,rw"], 32, "");
        let root = WritableRoot::new(runner.executor(), &RootSettings::default());

        root.with_writable_root(|| async { Ok(()) }).await.unwrap();
        assert_eq!(runner.calls(), vec![RW, RO]);
    }

    #[tokio::test]
    async fn test_custom_remount_commands() {
        let runner = RecordingRunner::new();
        let settings = RootSettings {
            remount_rw: vec!["rw-helper".into()],
            remount_ro: vec!["ro-helper".into(), "--sync".into()],
        };
        let root = WritableRoot::new(runner.executor(), &settings);

        root.with_writable_root(|| async { Ok(()) }).await.unwrap();
        assert_eq!(runner.calls(), vec!["rw-helper", "ro-helper --sync"]);
    }
}
