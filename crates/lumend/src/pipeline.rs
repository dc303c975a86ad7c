//! Update pipeline.
//!
//! The apply state machine: Idle -> Downloading -> Verifying ->
//! Installing -> Activating -> Restarting -> Reconciling -> Idle. Any
//! stage failure returns the cycle to Idle without clearing the
//! request flag, so the next tick retries. One cycle runs at a time;
//! shutdown is honored only between cycles.

use std::fs;
use std::sync::Arc;

use lumen_common::{AgentConfig, AgentState, StatusStore, TargetIndex, UpdateError, VersionLedger};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::activate;
use crate::artifact::{self, ArtifactFetcher};
use crate::service::ServiceManager;

pub struct UpdatePipeline<F, S> {
    config: Arc<AgentConfig>,
    status: Arc<StatusStore>,
    ledger: VersionLedger,
    fetcher: F,
    service_manager: S,
    /// Version running before the current cycle.
    running_version: Option<String>,
    /// Version kept for rollback; deleted at reconcile time.
    previous_version: Option<String>,
}

impl<F, S> UpdatePipeline<F, S>
where
    F: ArtifactFetcher,
    S: ServiceManager,
{
    pub fn new(
        config: Arc<AgentConfig>,
        status: Arc<StatusStore>,
        fetcher: F,
        service_manager: S,
    ) -> Self {
        let ledger = VersionLedger::new(
            config.install_root.clone(),
            config.index_path(),
            &config.service,
        );

        let running_version = match ledger.current_version() {
            Ok(v) => {
                info!("current version is {}", v);
                Some(v)
            }
            Err(e) => {
                warn!("could not determine current version: {}", e);
                None
            }
        };

        let previous_version = running_version.as_deref().and_then(|current| {
            match ledger.previous_version(current) {
                Ok(v) => {
                    info!("previous version is {}", v);
                    Some(v)
                }
                Err(e) => {
                    // Broken invariant: report, never guess, never delete.
                    warn!("could not determine previous version: {}", e);
                    None
                }
            }
        });

        Self {
            config,
            status,
            ledger,
            fetcher,
            service_manager,
            running_version,
            previous_version,
        }
    }

    /// Poll `update_requested` until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval =
            std::time::Duration::from_secs(self.config.request_poll_interval_secs.max(1));
        info!(
            "update pipeline started (polling every {}s)",
            interval.as_secs()
        );

        loop {
            match self.status.read() {
                Ok(status) if status.is_requested() => {
                    info!("update requested");
                    if let Err(e) = self.run_once().await {
                        // The request flag stays set; the next tick retries.
                        error!("update cycle failed: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("failed to read status file: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("update pipeline stopping");
                    return;
                }
            }
        }
    }

    /// One full apply cycle against the trusted index as cached on disk.
    pub async fn run_once(&mut self) -> Result<(), UpdateError> {
        // Downloading: resolve the trusted record and stage the artifact.
        let index = TargetIndex::load(&self.config.index_path())?;
        let entry = index.entry(&self.config.service)?.clone();
        info!("applying update to {}", entry.version);

        let staging = self.config.staging_artifact();
        self.fetcher.fetch(&entry.path, &staging).await?;

        // Verifying: the integrity gate. A mismatch discards the staged
        // artifact and aborts before anything touches the install tree.
        if let Err(e) = artifact::verify_artifact(&staging, &entry.hashes.sha256) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }

        // Installing: promote to the stable path, unpack into the new
        // version directory. A failed unpack leaves the archive behind
        // for inspection.
        let destination = self.config.artifact_destination();
        artifact::promote(&staging, &destination)?;
        let version_dir = self.ledger.version_path(&entry.version);
        artifact::unpack(&destination, &version_dir)?;
        if let Err(e) = fs::remove_file(&destination) {
            warn!("could not remove unpacked archive: {}", e);
        }

        // Activating: one atomic pointer flip.
        activate::activate_version(&self.config, &entry.version)?;
        activate::ensure_leaf_links(&self.config)?;

        // Restarting: abort here leaves both versions on disk and the
        // ledger untouched.
        self.service_manager.daemon_reload().await?;
        self.service_manager.restart_unit(&self.config.unit).await?;

        // Reconciling: enforce the two-version cap.
        self.reconcile(&entry.version);

        // Back to Idle: release the trigger.
        self.status.reset()?;

        let mut state = AgentState::load(&self.config.state_file);
        state.record_applied(&entry.version);
        if let Err(e) = state.save(&self.config.state_file) {
            warn!("failed to record agent state: {}", e);
        }

        info!("update to {} applied", entry.version);
        Ok(())
    }

    /// Delete the version that is neither the one that was running nor
    /// the one just activated, then roll the bookkeeping forward.
    /// Deletion failure is logged, not retried, and does not block the
    /// flag reset.
    fn reconcile(&mut self, new_version: &str) {
        match self.previous_version.take() {
            Some(prev) if prev != new_version => {
                info!("removing superseded version {}", prev);
                if let Err(e) = self.ledger.remove_version(&prev) {
                    warn!("failed to remove {}: {}", prev, e);
                }
            }
            Some(_) => {}
            None => info!("no previous version recorded, nothing to remove"),
        }

        self.previous_version = self
            .running_version
            .take()
            .filter(|v| v != new_version);
        self.running_version = Some(new_version.to_string());
    }
}
