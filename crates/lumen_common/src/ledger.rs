//! Version ledger.
//!
//! Installed builds live in directories named `v<YYYY>.<MM>.<DD>-sha.<7-hex>`
//! under the install root. At steady state exactly two of them exist:
//! the running version and the previous one kept for rollback. The
//! ledger derives both from disk plus the cached trusted index and
//! refuses to guess when the invariant is broken.

use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::UpdateError;
use crate::index::TargetIndex;

/// Directory-name pattern for an installed version.
pub const VERSION_DIR_PATTERN: &str = r"^v\d{4}\.\d{2}\.\d{2}-sha\.[a-fA-F0-9]{7}$";

pub struct VersionLedger {
    install_root: PathBuf,
    index_path: PathBuf,
    service: String,
    pattern: Regex,
}

impl VersionLedger {
    pub fn new<P: Into<PathBuf>>(install_root: P, index_path: P, service: &str) -> Self {
        Self {
            install_root: install_root.into(),
            index_path: index_path.into(),
            service: service.to_string(),
            pattern: Regex::new(VERSION_DIR_PATTERN).expect("version pattern is valid"),
        }
    }

    /// The version the trusted index currently records for the service.
    pub fn current_version(&self) -> Result<String, UpdateError> {
        let index = TargetIndex::load(&self.index_path)?;
        Ok(index.entry(&self.service)?.version.clone())
    }

    /// The installed version that is not `current`. Requires exactly two
    /// version directories on disk; anything else is a ledger error and
    /// nothing is touched.
    pub fn previous_version(&self, current: &str) -> Result<String, UpdateError> {
        let versions = self.version_dirs()?;

        if versions.len() != 2 {
            return Err(UpdateError::Ledger(format!(
                "expected 2 versioned directories in {}, found {}",
                self.install_root.display(),
                versions.len()
            )));
        }

        versions
            .into_iter()
            .find(|v| v != current)
            .ok_or_else(|| UpdateError::Ledger(format!("previous version not found for {}", current)))
    }

    /// All directory names under the install root that match the version
    /// pattern, sorted for stable reporting.
    pub fn version_dirs(&self) -> Result<Vec<String>, UpdateError> {
        let entries = std::fs::read_dir(&self.install_root).map_err(|e| {
            UpdateError::Ledger(format!(
                "failed to read install root {}: {}",
                self.install_root.display(),
                e
            ))
        })?;

        let mut versions: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| self.pattern.is_match(name))
            .collect();
        versions.sort();
        Ok(versions)
    }

    /// Delete one superseded version directory. Only names matching the
    /// version pattern are ever removed.
    pub fn remove_version(&self, version: &str) -> Result<(), UpdateError> {
        if !self.pattern.is_match(version) {
            return Err(UpdateError::Ledger(format!(
                "refusing to delete {}: not a version directory name",
                version
            )));
        }

        let path = self.install_root.join(version);
        if !path.exists() {
            warn!("version directory {} already gone", path.display());
            return Ok(());
        }
        std::fs::remove_dir_all(&path).map_err(|e| {
            UpdateError::Ledger(format!("failed to delete {}: {}", path.display(), e))
        })
    }

    pub fn version_path(&self, version: &str) -> PathBuf {
        self.install_root.join(version)
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const V1: &str = "v2023.12.01-sha.0f1e2d3";
    const V2: &str = "v2024.01.10-sha.abc1234";
    const V3: &str = "v2024.02.20-sha.beef007";

    fn ledger_in(dir: &TempDir) -> VersionLedger {
        VersionLedger::new(
            dir.path().to_path_buf(),
            dir.path().join("lumen-gateway-index.json"),
            "lumen-gateway",
        )
    }

    #[test]
    fn previous_version_with_exactly_two_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(V1)).unwrap();
        fs::create_dir(dir.path().join(V2)).unwrap();

        let ledger = ledger_in(&dir);
        assert_eq!(ledger.previous_version(V2).unwrap(), V1);
        assert_eq!(ledger.previous_version(V1).unwrap(), V2);
    }

    #[test]
    fn three_version_dirs_is_an_error_and_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        for v in [V1, V2, V3] {
            fs::create_dir(dir.path().join(v)).unwrap();
        }

        let ledger = ledger_in(&dir);
        let err = ledger.previous_version(V2).unwrap_err();
        assert!(matches!(err, UpdateError::Ledger(_)));

        for v in [V1, V2, V3] {
            assert!(dir.path().join(v).exists(), "{} must survive", v);
        }
    }

    #[test]
    fn one_version_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(V1)).unwrap();

        let ledger = ledger_in(&dir);
        assert!(matches!(
            ledger.previous_version(V1),
            Err(UpdateError::Ledger(_))
        ));
    }

    #[test]
    fn non_version_names_are_ignored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(V1)).unwrap();
        fs::create_dir(dir.path().join(V2)).unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();
        fs::create_dir(dir.path().join("v2024-not-a-version")).unwrap();
        fs::write(dir.path().join(V3), b"a file, not a dir").unwrap();

        let ledger = ledger_in(&dir);
        assert_eq!(ledger.version_dirs().unwrap(), vec![V1.to_string(), V2.to_string()]);
    }

    #[test]
    fn remove_version_refuses_non_version_names() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();

        let ledger = ledger_in(&dir);
        assert!(ledger.remove_version("data").is_err());
        assert!(dir.path().join("data").exists());
    }

    #[test]
    fn remove_version_deletes_the_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(V1).join("bin")).unwrap();

        let ledger = ledger_in(&dir);
        ledger.remove_version(V1).unwrap();
        assert!(!dir.path().join(V1).exists());

        // Removing a directory that is already gone is not an error.
        ledger.remove_version(V1).unwrap();
    }

    #[test]
    fn current_version_comes_from_the_index() {
        let dir = TempDir::new().unwrap();
        let index = format!(
            r#"{{"lumen-gateway": {{"bytes": "1", "path": "p", "hashes": {{"sha256": "00"}}, "version": "{}", "release-date": "2024-01-10"}}}}"#,
            V2
        );
        fs::write(dir.path().join("lumen-gateway-index.json"), index).unwrap();

        let ledger = ledger_in(&dir);
        assert_eq!(ledger.current_version().unwrap(), V2);
    }
}
