//! Trust bootstrap.
//!
//! On first run the agent has no trusted metadata at all. The initial
//! root document is fetched once over HTTPS and written verbatim; from
//! then on the TUF client takes over and the file is never rewritten by
//! this engine. Bootstrap failure is fatal to startup - nothing
//! downstream may run without a trusted root.

use std::fs;
use std::path::Path;

use lumen_common::{AgentConfig, UpdateError};
use tracing::info;

/// Create the working directories the engine expects.
pub fn prepare_environment(config: &AgentConfig) -> Result<(), UpdateError> {
    for dir in [
        &config.install_root,
        &config.metadata_dir,
        &config.data_dir,
        &config.staging_dir,
    ] {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Trust-On-First-Use: if a trusted root already exists this is a
/// no-op; otherwise fetch `1.root.json` from the metadata origin and
/// persist it. No retry - the caller decides whether to abort.
pub async fn ensure_trusted_root(
    client: &reqwest::Client,
    metadata_url: &str,
    metadata_dir: &Path,
) -> Result<(), UpdateError> {
    let root_path = metadata_dir.join("root.json");
    if root_path.exists() {
        return Ok(());
    }

    let url = format!("{}/1.root.json", metadata_url.trim_end_matches('/'));
    info!("no trusted root found, bootstrapping from {}", url);

    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| UpdateError::TrustBootstrap(format!("failed to fetch {}: {}", url, e)))?;

    if !resp.status().is_success() {
        return Err(UpdateError::TrustBootstrap(format!(
            "{} returned {}",
            url,
            resp.status()
        )));
    }

    let body = resp
        .bytes()
        .await
        .map_err(|e| UpdateError::TrustBootstrap(format!("failed to read root metadata: {}", e)))?;

    fs::create_dir_all(metadata_dir)
        .map_err(|e| UpdateError::TrustBootstrap(format!("failed to create metadata dir: {}", e)))?;
    fs::write(&root_path, &body)
        .map_err(|e| UpdateError::TrustBootstrap(format!("failed to write root.json: {}", e)))?;

    info!("trusted root written to {}", root_path.display());
    Ok(())
}
