//! Per-instance mutual exclusion backed by exclusive file locks.
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};
use strum_macros::AsRefStr;
use tracing::debug;

use crate::{error::VisorError, runtime::RuntimeLayout};

/// Which family of operations a lock serializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LockScope {
    /// Install and uninstall.
    Install,
    /// Start, stop and restart.
    Service,
}

/// Held exclusive lock on one `(package id, version, scope)`.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Blocks until the lock for the instance and scope is available.
    pub fn acquire(
        layout: &RuntimeLayout,
        package_id: &str,
        version: &str,
        scope: LockScope,
    ) -> Result<Self, VisorError> {
        let path = layout.lock_path(package_id, version, scope.as_ref());
        let failed = |source| VisorError::LockFailed {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(failed)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(failed)?;
        FileExt::lock_exclusive(&file).map_err(failed)?;

        debug!("Acquired {} lock for {package_id} {version}", scope.as_ref());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
