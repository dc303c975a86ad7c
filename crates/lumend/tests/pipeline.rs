//! End-to-end pipeline tests against a temporary installation tree,
//! with the network and systemd seams mocked out.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use lumen_common::{AgentConfig, StatusStore, UpdateError};
use lumend::artifact::ArtifactFetcher;
use lumend::pipeline::UpdatePipeline;
use lumend::service::ServiceManager;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use zip::write::FileOptions;

const V_PREV: &str = "v2023.11.20-sha.1234abc";
const V_OLD: &str = "v2023.12.01-sha.0f1e2d3";
const V_NEW: &str = "v2024.01.10-sha.abc1234";

/// Drops the artifact bytes at the destination, as if downloaded.
struct MockFetcher {
    bytes: Vec<u8>,
}

impl ArtifactFetcher for MockFetcher {
    async fn fetch(&self, _remote_path: &str, dest: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &self.bytes)?;
        Ok(())
    }
}

#[derive(Default)]
struct MockServiceManager {
    calls: Arc<Mutex<Vec<String>>>,
    fail_restart: bool,
}

impl ServiceManager for MockServiceManager {
    async fn daemon_reload(&self) -> Result<(), UpdateError> {
        self.calls.lock().unwrap().push("daemon-reload".to_string());
        Ok(())
    }

    async fn restart_unit(&self, unit: &str) -> Result<(), UpdateError> {
        self.calls.lock().unwrap().push(format!("restart {}", unit));
        if self.fail_restart {
            return Err(UpdateError::ServiceControl("unit failed to start".to_string()));
        }
        Ok(())
    }
}

struct World {
    _dir: TempDir,
    config: Arc<AgentConfig>,
    status: Arc<StatusStore>,
}

fn build_zip() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("bin/lumen-gateway", FileOptions::default())
        .unwrap();
    writer.write_all(b"new gateway build").unwrap();
    writer
        .start_file("config/lumen-gateway.yml", FileOptions::default())
        .unwrap();
    writer.write_all(b"port: 8443\n").unwrap();
    writer.finish().unwrap().into_inner()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn write_index(config: &AgentConfig, version: &str, sha256: &str) {
    let index = format!(
        r#"{{"{}": {{"bytes": "1024", "path": "https://artifacts.example/{}.zip", "hashes": {{"sha256": "{}"}}, "version": "{}", "release-date": "2024-01-10"}}}}"#,
        config.service, config.service, sha256, version
    );
    let path = config.index_path();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, index).unwrap();
}

fn make_version(config: &AgentConfig, version: &str) {
    let root = config.install_root.join(version);
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::write(root.join("bin").join(&config.service), version).unwrap();
    fs::write(
        root.join("config").join(format!("{}.yml", config.service)),
        "port: 8080\n",
    )
    .unwrap();
}

/// A steady-state installation: two versions on disk, the index still
/// pointing at the running one.
fn setup() -> World {
    let dir = TempDir::new().unwrap();
    let mut config = AgentConfig::default();
    config.install_root = dir.path().join("install");
    config.metadata_dir = dir.path().join("tuf");
    config.data_dir = dir.path().join("data");
    config.staging_dir = dir.path().join("tmp");
    config.status_file = dir.path().join("install/update_status.json");
    config.state_file = dir.path().join("install/internal/agent_state.json");
    config.bin_link = dir.path().join("links/lumen-gateway");
    config.config_link = dir.path().join("links/lumen-gateway.yml");

    fs::create_dir_all(&config.install_root).unwrap();
    make_version(&config, V_PREV);
    make_version(&config, V_OLD);
    write_index(&config, V_OLD, "unused");

    let status = Arc::new(StatusStore::new(config.status_file.clone()));
    World {
        _dir: dir,
        config: Arc::new(config),
        status,
    }
}

fn version_dirs(config: &AgentConfig) -> Vec<String> {
    let mut dirs: Vec<String> = fs::read_dir(&config.install_root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.starts_with('v'))
        .collect();
    dirs.sort();
    dirs
}

#[tokio::test]
async fn full_apply_cycle_end_to_end() {
    let world = setup();
    let zip_bytes = build_zip();
    let hash = sha256_hex(&zip_bytes);

    let mut pipeline = UpdatePipeline::new(
        world.config.clone(),
        world.status.clone(),
        MockFetcher { bytes: zip_bytes },
        MockServiceManager::default(),
    );

    // A newer index arrives and the operator requests the update.
    write_index(&world.config, V_NEW, &hash);
    world.status.set_available(true).unwrap();
    world.status.set_requested(true).unwrap();

    pipeline.run_once().await.unwrap();

    // Exactly two versions remain: the one that was running and the new one.
    assert_eq!(
        version_dirs(&world.config),
        vec![V_OLD.to_string(), V_NEW.to_string()]
    );
    assert!(!world.config.install_root.join(V_PREV).exists());

    // The current link points inside the new version and the fixed
    // leaf links resolve to the new build.
    assert_eq!(
        fs::read_link(world.config.current_link()).unwrap(),
        world.config.install_root.join(V_NEW)
    );
    assert_eq!(
        fs::read(&world.config.bin_link).unwrap(),
        b"new gateway build".to_vec()
    );
    assert_eq!(
        fs::read(&world.config.config_link).unwrap(),
        b"port: 8443\n".to_vec()
    );

    // Both flags are released and the archive is gone.
    let status = world.status.read().unwrap();
    assert_eq!(status.update_available, 0);
    assert_eq!(status.update_requested, 0);
    assert!(!world.config.artifact_destination().exists());
    assert!(!world.config.staging_artifact().exists());
}

#[tokio::test]
async fn hash_mismatch_never_installs_and_leaves_request_set() {
    let world = setup();
    let zip_bytes = build_zip();

    let mut pipeline = UpdatePipeline::new(
        world.config.clone(),
        world.status.clone(),
        MockFetcher {
            bytes: zip_bytes.clone(),
        },
        MockServiceManager::default(),
    );

    // Trusted index records a hash the artifact does not have.
    write_index(&world.config, V_NEW, "0000000000000000000000000000000000000000");
    world.status.set_requested(true).unwrap();

    let err = pipeline.run_once().await.unwrap_err();
    assert!(matches!(err, UpdateError::Integrity { .. }));

    // No install, no activation, staged artifact discarded.
    assert!(!world.config.install_root.join(V_NEW).exists());
    assert!(fs::read_link(world.config.current_link()).is_err());
    assert!(!world.config.staging_artifact().exists());

    // The request survives the failed cycle...
    assert!(world.status.read().unwrap().is_requested());

    // ...and the same request completes once the index is corrected.
    write_index(&world.config, V_NEW, &sha256_hex(&zip_bytes));
    pipeline.run_once().await.unwrap();

    assert_eq!(
        version_dirs(&world.config),
        vec![V_OLD.to_string(), V_NEW.to_string()]
    );
    assert!(!world.status.read().unwrap().is_requested());
}

#[tokio::test]
async fn restart_failure_aborts_before_reconcile() {
    let world = setup();
    let zip_bytes = build_zip();
    let hash = sha256_hex(&zip_bytes);

    let mut pipeline = UpdatePipeline::new(
        world.config.clone(),
        world.status.clone(),
        MockFetcher { bytes: zip_bytes },
        MockServiceManager {
            fail_restart: true,
            ..Default::default()
        },
    );

    write_index(&world.config, V_NEW, &hash);
    world.status.set_requested(true).unwrap();

    let err = pipeline.run_once().await.unwrap_err();
    assert!(matches!(err, UpdateError::ServiceControl(_)));

    // Nothing was deleted and the trigger is still armed for a retry.
    for v in [V_PREV, V_OLD, V_NEW] {
        assert!(world.config.install_root.join(v).exists(), "{} must remain", v);
    }
    assert!(world.status.read().unwrap().is_requested());
}

#[tokio::test]
async fn reload_precedes_restart_and_state_is_recorded() {
    let world = setup();
    let zip_bytes = build_zip();
    let hash = sha256_hex(&zip_bytes);

    let manager = MockServiceManager::default();
    let calls = manager.calls.clone();
    let mut pipeline = UpdatePipeline::new(
        world.config.clone(),
        world.status.clone(),
        MockFetcher { bytes: zip_bytes },
        manager,
    );

    write_index(&world.config, V_NEW, &hash);
    world.status.set_requested(true).unwrap();
    pipeline.run_once().await.unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "daemon-reload".to_string(),
            "restart lumen-gateway.service".to_string()
        ]
    );

    let state = lumen_common::AgentState::load(&world.config.state_file);
    assert_eq!(state.last_applied_version.as_deref(), Some(V_NEW));
}
