//! Private agent state record.
//!
//! Distinct from the shared status file: this one belongs to the agent
//! alone and exists for truthful reporting (what was checked when, what
//! was last applied). It never gates engine behavior.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result of the last availability check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Check succeeded, local index already current.
    NoUpdate,
    /// Check succeeded, a newer index was fetched.
    UpdateAvailable,
    /// Check failed.
    Failed { error: String },
    /// Never checked.
    Pending,
}

impl Default for CheckOutcome {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// Last availability check (epoch seconds).
    pub last_check_epoch: Option<u64>,
    /// Outcome of that check.
    pub last_result: CheckOutcome,
    /// Version string of the last successful apply.
    pub last_applied_version: Option<String>,
    /// RFC-3339 timestamp of the last successful apply.
    pub last_applied_at: Option<String>,
}

impl AgentState {
    /// Load state from disk, defaulting when absent or unparsable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }

    pub fn record_check(&mut self, outcome: CheckOutcome) {
        self.last_check_epoch = Some(Utc::now().timestamp().max(0) as u64);
        self.last_result = outcome;
    }

    pub fn record_applied(&mut self, version: &str) {
        self.last_applied_version = Some(version.to_string());
        self.last_applied_at = Some(Utc::now().to_rfc3339());
    }

    /// Human-readable age of the last check.
    pub fn format_last_check(&self) -> String {
        match self.last_check_epoch {
            Some(epoch) => {
                let now = Utc::now().timestamp().max(0) as u64;
                format_age(now.saturating_sub(epoch))
            }
            None => "never".to_string(),
        }
    }
}

fn format_age(secs: u64) -> String {
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_state_is_pending() {
        let state = AgentState::default();
        assert_eq!(state.last_result, CheckOutcome::Pending);
        assert!(state.last_check_epoch.is_none());
        assert_eq!(state.format_last_check(), "never");
    }

    #[test]
    fn record_and_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent_state.json");

        let mut state = AgentState::default();
        state.record_check(CheckOutcome::UpdateAvailable);
        state.record_applied("v2024.01.10-sha.abc1234");
        state.save(&path).unwrap();

        let loaded = AgentState::load(&path);
        assert_eq!(loaded.last_result, CheckOutcome::UpdateAvailable);
        assert_eq!(
            loaded.last_applied_version.as_deref(),
            Some("v2024.01.10-sha.abc1234")
        );
        assert!(loaded.last_check_epoch.is_some());
        assert!(loaded.last_applied_at.is_some());
    }

    #[test]
    fn broken_state_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent_state.json");
        std::fs::write(&path, "{{{").unwrap();
        let state = AgentState::load(&path);
        assert_eq!(state.last_result, CheckOutcome::Pending);
    }

    #[test]
    fn format_age_buckets() {
        assert_eq!(format_age(30), "30s ago");
        assert_eq!(format_age(120), "2m ago");
        assert_eq!(format_age(7200), "2h ago");
        assert_eq!(format_age(200_000), "2d ago");
    }
}
