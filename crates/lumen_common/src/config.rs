//! Agent configuration.
//!
//! Loads settings from /etc/lumen/config.toml or uses defaults. Every
//! field has a default so a bare installation runs without any config
//! file; the flag/CLI surface on top of this is an external concern.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Config file path.
pub const CONFIG_PATH: &str = "/etc/lumen/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of the managed service; also keys the trusted index.
    pub service: String,
    /// systemd unit restarted after activation.
    pub unit: String,

    /// Trusted-metadata origin (root/timestamp/snapshot/targets).
    pub metadata_url: String,
    /// Content-addressed targets origin.
    pub targets_url: String,

    /// Root of the installation tree holding the version directories.
    pub install_root: PathBuf,
    /// Locally trusted TUF metadata (root.json and refreshed roles).
    pub metadata_dir: PathBuf,
    /// Cached trusted targets (the downloaded index lives here).
    pub data_dir: PathBuf,
    /// Download staging area.
    pub staging_dir: PathBuf,

    /// Shared status record, co-owned with the HTTP collaborator.
    pub status_file: PathBuf,
    /// Private agent state record.
    pub state_file: PathBuf,
    /// Service-account credential file for the artifact origin.
    pub credentials_file: PathBuf,

    /// Fixed symlink to the active service binary.
    pub bin_link: PathBuf,
    /// Fixed symlink to the active service config.
    pub config_link: PathBuf,

    /// Seconds between availability checks.
    pub availability_interval_secs: u64,
    /// Seconds between update_requested polls.
    pub request_poll_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let install_root = PathBuf::from("/var/lib/lumen");
        Self {
            service: "lumen-gateway".to_string(),
            unit: "lumen-gateway.service".to_string(),
            metadata_url: "https://updates.lumen.example/metadata".to_string(),
            targets_url: "https://updates.lumen.example/targets".to_string(),
            metadata_dir: install_root.join("tuf"),
            data_dir: install_root.join("data"),
            staging_dir: install_root.join("tmp"),
            status_file: install_root.join("update_status.json"),
            state_file: install_root.join("internal/agent_state.json"),
            credentials_file: PathBuf::from("/etc/lumen/artifact-credentials.json"),
            bin_link: PathBuf::from("/usr/local/bin/lumen-gateway"),
            config_link: PathBuf::from("/etc/lumen-gateway/lumen-gateway.yml"),
            availability_interval_secs: 60,
            request_poll_interval_secs: 5,
            install_root,
        }
    }
}

impl AgentConfig {
    /// Load from the fixed path, falling back to defaults when the file
    /// is absent or unparsable.
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("failed to parse {}, using defaults: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Where the cached trusted index for the managed service lives.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir
            .join(&self.service)
            .join(format!("{}-index.json", self.service))
    }

    /// Target name of the index inside the TUF repository.
    pub fn index_target_name(&self) -> String {
        format!("{}/{}-index.json", self.service, self.service)
    }

    /// Staging path the artifact is downloaded to.
    pub fn staging_artifact(&self) -> PathBuf {
        self.staging_dir.join(format!("{}.zip", self.service))
    }

    /// Stable path a verified artifact is promoted to before unpacking.
    pub fn artifact_destination(&self) -> PathBuf {
        self.install_root.join(format!("{}.zip", self.service))
    }

    /// Path of the service binary inside one version directory.
    pub fn versioned_binary(&self, version: &str) -> PathBuf {
        self.install_root.join(version).join("bin").join(&self.service)
    }

    /// Path of the service config inside one version directory.
    pub fn versioned_config(&self, version: &str) -> PathBuf {
        self.install_root
            .join(version)
            .join("config")
            .join(format!("{}.yml", self.service))
    }

    /// The `current` activation symlink at the install root.
    pub fn current_link(&self) -> PathBuf {
        self.install_root.join("current")
    }
}
