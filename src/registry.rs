//! Best-effort metadata registry of installed instances.
//!
//! The instance directory on disk decides whether something is installed; the
//! registry only keeps convenience data (name, category, timestamp) and may
//! drift from the filesystem.
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::{constants::LOCK_SUFFIX, error::RegistryError};

/// One recorded installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub package_id: String,
    pub name: String,
    pub version: String,
    pub category: String,
    pub install_path: PathBuf,
    pub installed_at: DateTime<Utc>,
}

/// Storage for installation records, consulted only on a best-effort basis.
pub trait MetadataStore {
    /// Inserts or replaces the record for `(record.package_id, record.version)`.
    fn record(&self, record: InstalledRecord) -> Result<(), RegistryError>;

    /// Drops the record for one instance; `NotFound` if none exists.
    fn remove(&self, package_id: &str, version: &str) -> Result<(), RegistryError>;

    /// Returns the record for one instance, if any.
    fn get(&self, package_id: &str, version: &str) -> Result<Option<InstalledRecord>, RegistryError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    instances: BTreeMap<String, InstalledRecord>,
}

fn instance_key(package_id: &str, version: &str) -> String {
    format!("{package_id}@{version}")
}

/// JSON-file registry at `{state}/installed.json`.
///
/// Every operation re-reads the file so separate processes observe each
/// other's updates. Writers hold an exclusive lock on a sibling `.lock` file
/// from load to save, and the new contents replace the old file by rename.
#[derive(Debug, Clone)]
pub struct InstallRegistry {
    path: PathBuf,
}

impl InstallRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RegistryFile, RegistryError> {
        if !self.path.exists() {
            return Ok(RegistryFile::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(RegistryFile::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| OsString::from("installed.json"));
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Blocks until no other writer, in this process or another, holds the
    /// registry.
    fn lock(&self) -> Result<WriteLock, RegistryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.sibling(LOCK_SUFFIX))?;
        FileExt::lock_exclusive(&file)?;
        Ok(WriteLock { file })
    }

    fn save(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        let staged = self.sibling(".tmp");
        fs::write(&staged, serde_json::to_string_pretty(file)?)?;
        fs::rename(&staged, &self.path)?;
        Ok(())
    }

    /// All records, ordered by `{id}@{version}`.
    pub fn records(&self) -> Result<Vec<InstalledRecord>, RegistryError> {
        Ok(self.load()?.instances.into_values().collect())
    }
}

/// Held registry write lock, released on drop.
struct WriteLock {
    file: File,
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl MetadataStore for InstallRegistry {
    fn record(&self, record: InstalledRecord) -> Result<(), RegistryError> {
        let _lock = self.lock()?;
        let mut file = self.load()?;
        debug!(
            "Recording {} {} at {}",
            record.package_id,
            record.version,
            record.install_path.display()
        );
        file.instances
            .insert(instance_key(&record.package_id, &record.version), record);
        self.save(&file)
    }

    fn remove(&self, package_id: &str, version: &str) -> Result<(), RegistryError> {
        let _lock = self.lock()?;
        let mut file = self.load()?;
        if file
            .instances
            .remove(&instance_key(package_id, version))
            .is_some()
        {
            self.save(&file)
        } else {
            Err(RegistryError::NotFound)
        }
    }

    fn get(&self, package_id: &str, version: &str) -> Result<Option<InstalledRecord>, RegistryError> {
        Ok(self
            .load()?
            .instances
            .remove(&instance_key(package_id, version)))
    }
}
