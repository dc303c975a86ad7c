//! Atomic activation.
//!
//! "What is currently running" is defined by a single `current`
//! symlink at the install root. Activation stages a replacement link
//! and commits it with one rename, so there is no window in which the
//! binary and config point at different versions. The two fixed leaf
//! links (binary, config) route through `current` and are created once,
//! never rewritten during an apply.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use lumen_common::{AgentConfig, UpdateError};
use tracing::info;

/// Point `current` at the given version directory with a single atomic
/// rename.
pub fn activate_version(config: &AgentConfig, version: &str) -> Result<(), UpdateError> {
    let target = config.install_root.join(version);
    if !target.is_dir() {
        return Err(UpdateError::Activation(format!(
            "version directory {} does not exist",
            target.display()
        )));
    }

    let current = config.current_link();
    let staged = config.install_root.join("current.new");

    // A leftover staged link from a crashed attempt is stale by definition.
    if fs::symlink_metadata(&staged).is_ok() {
        fs::remove_file(&staged)
            .map_err(|e| UpdateError::Activation(format!("failed to clear stale link: {}", e)))?;
    }

    symlink(&target, &staged)
        .map_err(|e| UpdateError::Activation(format!("failed to stage current link: {}", e)))?;
    fs::rename(&staged, &current)
        .map_err(|e| UpdateError::Activation(format!("failed to commit current link: {}", e)))?;

    info!("activated {}", version);
    Ok(())
}

/// Make sure the fixed binary and config symlinks exist, pointing
/// through `current`. Existing links are left alone.
pub fn ensure_leaf_links(config: &AgentConfig) -> Result<(), UpdateError> {
    let current = config.current_link();
    ensure_link(&current.join("bin").join(&config.service), &config.bin_link)?;
    ensure_link(
        &current.join("config").join(format!("{}.yml", config.service)),
        &config.config_link,
    )?;
    Ok(())
}

fn ensure_link(target: &Path, link: &Path) -> Result<(), UpdateError> {
    if fs::symlink_metadata(link).is_ok() {
        return Ok(());
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| UpdateError::Activation(format!("failed to create link dir: {}", e)))?;
    }
    symlink(target, link).map_err(|e| {
        UpdateError::Activation(format!("failed to create symlink {}: {}", link.display(), e))
    })
}
