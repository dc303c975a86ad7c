//! Agent wiring.
//!
//! One engine, no global state: everything is constructed here and
//! handed to the two loops. The loops communicate only through the
//! shared status file and stop at their next tick boundary when a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use lumen_common::{AgentConfig, StatusStore, UpdateError};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;

use crate::artifact::HttpArtifactFetcher;
use crate::bootstrap;
use crate::metadata::MetadataRefresher;
use crate::pipeline::UpdatePipeline;
use crate::poller::AvailabilityPoller;
use crate::service::SystemdManager;

/// Run the agent until SIGINT/SIGTERM. Only trust bootstrap failures
/// abort startup; everything after that is retried by the loops.
pub async fn run(config: AgentConfig) -> Result<(), UpdateError> {
    bootstrap::prepare_environment(&config)?;

    let client = reqwest::Client::builder()
        .user_agent(format!("lumend/{}", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default();
    bootstrap::ensure_trusted_root(&client, &config.metadata_url, &config.metadata_dir).await?;

    let config = Arc::new(config);
    let status = Arc::new(StatusStore::new(config.status_file.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = AvailabilityPoller::new(MetadataRefresher::new(&config), status.clone(), &config);
    let pipeline = UpdatePipeline::new(
        config.clone(),
        status,
        HttpArtifactFetcher::new(config.credentials_file.clone()),
        SystemdManager,
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested, stopping at the next tick");
        let _ = shutdown_tx.send(true);
    });

    let pipeline_shutdown = shutdown_rx.clone();
    tokio::join!(poller.run(shutdown_rx), pipeline.run(pipeline_shutdown));

    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
