//! Lumen update agent daemon.
//!
//! Keeps a managed service current: polls trusted update metadata for a
//! newer build and, on operator request, downloads, verifies, installs
//! and activates it.

use anyhow::Result;
use lumen_common::AgentConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("lumend v{} starting", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load();
    lumend::agent::run(config).await?;

    info!("lumend stopped");
    Ok(())
}
