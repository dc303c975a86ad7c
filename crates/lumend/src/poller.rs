//! Availability poller.
//!
//! Asks the metadata refresher whether the locally cached target index
//! is still current. A cache miss means a newer build exists, so the
//! shared `update_available` flag goes up. The flag is never lowered
//! here - only a successful apply clears it. Errors are logged and the
//! loop keeps ticking.

use std::path::PathBuf;
use std::sync::Arc;

use lumen_common::{AgentConfig, AgentState, CheckOutcome, StatusStore};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::metadata::{CacheStatus, MetadataRefresher};

pub struct AvailabilityPoller {
    refresher: MetadataRefresher,
    status: Arc<StatusStore>,
    state_file: PathBuf,
    interval: std::time::Duration,
}

impl AvailabilityPoller {
    pub fn new(refresher: MetadataRefresher, status: Arc<StatusStore>, config: &AgentConfig) -> Self {
        Self {
            refresher,
            status,
            state_file: config.state_file.clone(),
            interval: std::time::Duration::from_secs(config.availability_interval_secs.max(1)),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "availability poller started (checking every {}s)",
            self.interval.as_secs()
        );

        loop {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("availability poller stopping");
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        let outcome = match self.refresher.refresh_target_index().await {
            Ok((_, CacheStatus::Miss)) => {
                match self.status.set_available(true) {
                    Ok(_) => info!("newer target index fetched, update available"),
                    Err(e) => error!("failed to raise update_available: {}", e),
                }
                CheckOutcome::UpdateAvailable
            }
            Ok((_, CacheStatus::Hit)) => {
                debug!("local target index is current");
                CheckOutcome::NoUpdate
            }
            Err(e) => {
                error!("availability check failed: {}", e);
                CheckOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        let mut state = AgentState::load(&self.state_file);
        state.record_check(outcome);
        if let Err(e) = state.save(&self.state_file) {
            debug!("failed to record agent state: {}", e);
        }
    }
}
