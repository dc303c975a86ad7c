//! Service manager integration.
//!
//! Restarting the managed unit is the one step the engine cannot
//! verify from the filesystem, so it goes through a seam: the systemd
//! implementation shells out to systemctl, and tests substitute a
//! recording mock.

use lumen_common::UpdateError;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

pub trait ServiceManager {
    /// Reload unit definitions (daemon-reload).
    fn daemon_reload(&self) -> impl std::future::Future<Output = Result<(), UpdateError>> + Send;

    /// Restart the unit and confirm it came back up.
    fn restart_unit(
        &self,
        unit: &str,
    ) -> impl std::future::Future<Output = Result<(), UpdateError>> + Send;
}

/// systemd-backed manager.
pub struct SystemdManager;

impl SystemdManager {
    async fn systemctl(args: &[&str]) -> Result<std::process::Output, UpdateError> {
        Command::new("systemctl")
            .args(args)
            .output()
            .await
            .map_err(|e| UpdateError::ServiceControl(format!("systemctl failed to run: {}", e)))
    }
}

impl ServiceManager for SystemdManager {
    async fn daemon_reload(&self) -> Result<(), UpdateError> {
        let output = Self::systemctl(&["daemon-reload"]).await?;
        if !output.status.success() {
            return Err(UpdateError::ServiceControl(format!(
                "daemon-reload failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn restart_unit(&self, unit: &str) -> Result<(), UpdateError> {
        let output = Self::systemctl(&["restart", unit]).await?;
        if !output.status.success() {
            return Err(UpdateError::ServiceControl(format!(
                "restart of {} failed: {}",
                unit,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        // Give the unit a moment to come up before checking on it.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = Self::systemctl(&["is-active", "--quiet", unit]).await?;
        if !status.status.success() {
            return Err(UpdateError::ServiceControl(format!(
                "{} did not come back after restart",
                unit
            )));
        }

        info!("{} restarted", unit);
        Ok(())
    }
}
