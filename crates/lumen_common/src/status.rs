//! Shared update status file.
//!
//! `update_status.json` is the only coordination point between the
//! engine and the HTTP-facing collaborator process: the poller raises
//! `update_available`, the collaborator raises `update_requested`, and
//! the pipeline resets both after a successful apply.
//!
//! Both processes rewrite the same file, so every read-modify-write
//! runs under an advisory flock on a sidecar lock file (the sidecar
//! keeps a stable inode across rewrites), and the rewrite itself goes
//! through a temp file and an atomic rename so a reader never observes
//! a torn document.

use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::UpdateError;

/// The shared status record. Fields are 0|1 integers on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub update_available: u8,
    pub update_requested: u8,
}

impl UpdateStatus {
    pub fn is_available(&self) -> bool {
        self.update_available == 1
    }

    pub fn is_requested(&self) -> bool {
        self.update_requested == 1
    }
}

/// File-backed status store, safe against the in-process loops (mutex)
/// and against the collaborator process (flock for the RMW span).
pub struct StatusStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl StatusStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current record. Missing or unparsable files read as
    /// all-zero rather than failing the caller's loop.
    pub fn read(&self) -> Result<UpdateStatus, UpdateError> {
        let _guard = self.guard.lock().expect("status mutex poisoned");
        let _lock = self.flock()?;
        Ok(self.read_unlocked())
    }

    /// Set `update_available`, leaving `update_requested` as found.
    pub fn set_available(&self, on: bool) -> Result<UpdateStatus, UpdateError> {
        self.update(|s| s.update_available = u8::from(on))
    }

    /// Set `update_requested`, leaving `update_available` as found.
    /// The engine itself only clears this flag via `reset`; the setter
    /// exists for the collaborator side and for tests.
    pub fn set_requested(&self, on: bool) -> Result<UpdateStatus, UpdateError> {
        self.update(|s| s.update_requested = u8::from(on))
    }

    /// Reset both flags to 0, releasing the trigger for the next cycle.
    pub fn reset(&self) -> Result<UpdateStatus, UpdateError> {
        self.update(|s| *s = UpdateStatus::default())
    }

    fn update<F>(&self, mutate: F) -> Result<UpdateStatus, UpdateError>
    where
        F: FnOnce(&mut UpdateStatus),
    {
        let _guard = self.guard.lock().expect("status mutex poisoned");
        let _lock = self.flock()?;

        let mut status = self.read_unlocked();
        mutate(&mut status);
        self.write_atomic(&status)?;
        Ok(status)
    }

    /// Exclusive advisory lock held for the whole read-modify-write.
    fn flock(&self) -> Result<Flock<fs::File>, UpdateError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| UpdateError::Io(std::io::Error::from_raw_os_error(errno as i32)))
    }

    fn read_unlocked(&self) -> UpdateStatus {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => UpdateStatus::default(),
        }
    }

    fn write_atomic(&self, status: &UpdateStatus) -> Result<(), UpdateError> {
        let content = serde_json::to_string_pretty(status)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
