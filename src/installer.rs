//! Install orchestration: resolve, download, extract, configure, record.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    archive,
    catalog::{Catalog, PackageDescriptor, Platform, ResolvedDownload},
    constants::{
        PROGRESS_COMPLETE, PROGRESS_CONFIGURE_START, PROGRESS_DOWNLOAD_END,
        PROGRESS_EXTRACT_START,
    },
    download::{Fetcher, scaled_progress, verify_sha256},
    error::{VisorError, Warning, WarningKind},
    family::Instance,
    lock::{InstanceLock, LockScope},
    registry::{InstalledRecord, MetadataStore},
    runtime::RuntimeLayout,
    service_config::ensure_default_config,
};

/// Stage of an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstallStatus {
    Downloading,
    Extracting,
    Configuring,
    Complete,
    Error,
}

/// Snapshot of one install call, updated in place as the pipeline advances.
#[derive(Debug, Clone, Serialize)]
pub struct InstallProgress {
    pub package_id: String,
    pub version: String,
    pub status: InstallStatus,
    /// 0 to 100.
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl InstallProgress {
    fn new(package_id: &str, version: &str) -> Self {
        Self {
            package_id: package_id.to_string(),
            version: version.to_string(),
            status: InstallStatus::Downloading,
            progress: 0.0,
            message: String::new(),
            install_path: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    fn advance(&mut self, status: InstallStatus, progress: f64, message: impl Into<String>) {
        self.status = status;
        self.progress = progress;
        self.message = message.into();
    }
}

/// A failed install, with the progress reached before the failure.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct InstallFailure {
    pub progress: InstallProgress,
    #[source]
    pub error: VisorError,
}

/// Options for [`Installer::install`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Wipe and reinstall even when a completed install is present.
    pub force: bool,
}

/// What an install would do, computed without side effects.
#[derive(Debug, Clone, Serialize)]
pub struct InstallPreview {
    pub package_id: String,
    pub name: String,
    pub version: String,
    pub download: ResolvedDownload,
    pub file_name: String,
    pub install_path: PathBuf,
    pub installed: bool,
}

/// One instance directory found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledEntry {
    pub package_id: String,
    pub name: String,
    pub version: String,
    pub category: String,
    pub install_path: PathBuf,
    /// A completion receipt is present.
    pub complete: bool,
    /// The metadata registry has a row for this instance.
    pub recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

/// Result of [`Installer::uninstall`].
#[derive(Debug, Clone, Serialize)]
pub struct UninstallReport {
    pub install_path: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// Marker written once an instance finished installing.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstallReceipt {
    package_id: String,
    version: String,
    url: String,
    installed_at: DateTime<Utc>,
}

/// Sequences the install pipeline for catalog packages.
pub struct Installer<'a> {
    catalog: &'a Catalog,
    layout: &'a RuntimeLayout,
    platform: Platform,
    fetcher: &'a dyn Fetcher,
    store: &'a dyn MetadataStore,
    verify_checksums: bool,
}

impl<'a> Installer<'a> {
    pub fn new(
        catalog: &'a Catalog,
        layout: &'a RuntimeLayout,
        platform: Platform,
        fetcher: &'a dyn Fetcher,
        store: &'a dyn MetadataStore,
    ) -> Self {
        Self {
            catalog,
            layout,
            platform,
            fetcher,
            store,
            verify_checksums: true,
        }
    }

    /// Enables or disables sha256 verification for catalog entries that
    /// record a digest.
    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Resolves the download and target directory without touching disk.
    pub fn preview(&self, package_id: &str, version: &str) -> Result<InstallPreview, VisorError> {
        let package = self.catalog.require(package_id)?;
        let download = self.catalog.resolve(package_id, version, &self.platform)?;
        let install_path = self.layout.install_dir(&package.install_subpath, version);
        Ok(InstallPreview {
            package_id: package.id.clone(),
            name: package.name.clone(),
            version: version.to_string(),
            file_name: download.file_name(),
            download,
            installed: install_path.is_dir(),
            install_path,
        })
    }

    /// Every instance directory under the base dir, for all catalog packages.
    pub fn installed(&self) -> Vec<InstalledEntry> {
        let mut entries = Vec::new();
        for package in self.catalog.packages() {
            for version in self.layout.installed_versions(&package.install_subpath) {
                let path = self.layout.install_dir(&package.install_subpath, &version);
                entries.push(self.describe_installed(package, version, path));
            }
        }
        entries
    }

    fn describe_installed(
        &self,
        package: &PackageDescriptor,
        version: String,
        path: PathBuf,
    ) -> InstalledEntry {
        let record = match self.store.get(&package.id, &version) {
            Ok(record) => record,
            Err(err) => {
                debug!("Registry lookup for {} {version} failed: {err}", package.id);
                None
            }
        };
        let installed_at = record.as_ref().map(|r| r.installed_at).or_else(|| {
            fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .ok()
                .map(DateTime::<Utc>::from)
        });

        InstalledEntry {
            package_id: package.id.clone(),
            name: package.name.clone(),
            category: package.category.clone(),
            complete: self
                .layout
                .receipt_path(&package.install_subpath, &version)
                .is_file(),
            recorded: record.is_some(),
            installed_at,
            install_path: path,
            version,
        }
    }

    /// Installs one `(package, version)`, reporting every state change to
    /// `on_progress`.
    ///
    /// A completed install (receipt present) is left untouched unless
    /// `options.force` is set; anything else already in the directory is
    /// wiped before extraction.
    pub fn install(
        &self,
        package_id: &str,
        version: &str,
        options: InstallOptions,
        on_progress: &mut dyn FnMut(&InstallProgress),
    ) -> Result<InstallProgress, InstallFailure> {
        let mut progress = InstallProgress::new(package_id, version);
        match self.run_install(package_id, version, options, &mut progress, on_progress) {
            Ok(()) => Ok(progress),
            Err(error) => {
                progress.status = InstallStatus::Error;
                progress.error = Some(error.to_string());
                progress.message = format!("Install of {package_id} {version} failed");
                tracing::error!("Install of {package_id} {version} failed: {error}");
                on_progress(&progress);
                Err(InstallFailure { progress, error })
            }
        }
    }

    fn run_install(
        &self,
        package_id: &str,
        version: &str,
        options: InstallOptions,
        progress: &mut InstallProgress,
        on_progress: &mut dyn FnMut(&InstallProgress),
    ) -> Result<(), VisorError> {
        let package = self.catalog.require(package_id)?;
        let download = self.catalog.resolve(package_id, version, &self.platform)?;
        let instance = Instance::locate(package, version, self.layout, &self.platform);
        let install_dir = instance.install_dir.clone();
        let receipt = self.layout.receipt_path(&package.install_subpath, version);
        progress.install_path = Some(install_dir.clone());

        let _lock = InstanceLock::acquire(self.layout, package_id, version, LockScope::Install)?;

        if receipt.is_file() && !options.force {
            progress.warnings.push(Warning::new(
                WarningKind::AlreadyInstalled,
                format!("{} {version} is already installed at {}", package.name, install_dir.display()),
            ));
            progress.advance(
                InstallStatus::Complete,
                PROGRESS_COMPLETE,
                format!("{} {version} is already installed", package.name),
            );
            on_progress(progress);
            return Ok(());
        }

        if install_dir.exists() {
            info!("Clearing previous contents of {}", install_dir.display());
            fs::remove_dir_all(&install_dir).map_err(|source| VisorError::DeleteFailed {
                path: install_dir.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&install_dir)
            .map_err(|err| VisorError::io("failed to create install directory", err))?;
        let scratch = self.layout.scratch_dir().join(format!("{package_id}-{version}"));
        fs::create_dir_all(&scratch)
            .map_err(|err| VisorError::io("failed to create scratch directory", err))?;

        progress.advance(InstallStatus::Downloading, 0.0, "Starting download...");
        on_progress(progress);

        let archive_path = scratch.join(download.file_name());
        let fetched = self.fetcher.fetch(&download.url, &archive_path, &mut |done, total| {
            match scaled_progress(done, total, PROGRESS_DOWNLOAD_END) {
                Some(value) => {
                    progress.progress = value;
                    progress.message =
                        format!("Downloading... {:.1}%", value / PROGRESS_DOWNLOAD_END * 100.0);
                }
                None => progress.message = format!("Downloading... {done} bytes"),
            }
            on_progress(progress);
        });
        if let Err(err) = fetched {
            self.remove_scratch(&scratch, progress);
            return Err(err);
        }

        if self.verify_checksums
            && let Some(expected) = download.sha256.as_deref()
            && let Err(err) = verify_sha256(&archive_path, expected, &download.url)
        {
            self.remove_scratch(&scratch, progress);
            return Err(err);
        }

        progress.advance(InstallStatus::Extracting, PROGRESS_EXTRACT_START, "Extracting files...");
        on_progress(progress);

        let extracted = archive::extract(&archive_path, &install_dir);
        self.remove_scratch(&scratch, progress);
        extracted?;

        progress.advance(InstallStatus::Configuring, PROGRESS_CONFIGURE_START, "Configuring...");
        on_progress(progress);

        if let Some(path) = ensure_default_config(&instance)? {
            debug!("Wrote default config {}", path.display());
        }
        write_receipt(&receipt, package_id, version, &download.url)?;

        let record = InstalledRecord {
            package_id: package.id.clone(),
            name: package.name.clone(),
            version: version.to_string(),
            category: package.category.clone(),
            install_path: install_dir.clone(),
            installed_at: Utc::now(),
        };
        if let Err(err) = self.store.record(record) {
            progress.warnings.push(Warning::new(
                WarningKind::MetadataRecordFailed,
                format!("install of {} {version} succeeded but was not recorded: {err}", package.id),
            ));
        }

        progress.advance(
            InstallStatus::Complete,
            PROGRESS_COMPLETE,
            format!("{} {version} installed successfully", package.name),
        );
        info!("{}", progress.message);
        on_progress(progress);
        Ok(())
    }

    fn remove_scratch(&self, scratch: &Path, progress: &mut InstallProgress) {
        if let Err(err) = fs::remove_dir_all(scratch) {
            warn!("Could not remove scratch dir {}: {err}", scratch.display());
            progress.warnings.push(Warning::new(
                WarningKind::ScratchCleanupFailed,
                format!("could not remove {}: {err}", scratch.display()),
            ));
        }
    }

    /// Removes an instance directory and its registry row.
    ///
    /// The registry row is dropped even when the directory removal fails.
    pub fn uninstall(&self, package_id: &str, version: &str) -> Result<UninstallReport, VisorError> {
        let package = self.catalog.require(package_id)?;
        let install_path = self.layout.install_dir(&package.install_subpath, version);
        let _lock = InstanceLock::acquire(self.layout, package_id, version, LockScope::Install)?;

        if !install_path.exists() {
            return Err(VisorError::NotInstalled {
                package: package_id.to_string(),
                version: version.to_string(),
            });
        }

        info!("Removing {}", install_path.display());
        let removed = fs::remove_dir_all(&install_path);

        let mut warnings = Vec::new();
        match self.store.remove(package_id, version) {
            Ok(()) => {}
            Err(crate::error::RegistryError::NotFound) => {
                debug!("{package_id} {version} had no registry row");
            }
            Err(err) => warnings.push(Warning::new(
                WarningKind::MetadataRemoveFailed,
                format!("could not drop registry row for {package_id} {version}: {err}"),
            )),
        }

        removed.map_err(|source| VisorError::DeleteFailed {
            path: install_path.clone(),
            source,
        })?;

        Ok(UninstallReport {
            install_path,
            warnings,
        })
    }
}

fn write_receipt(
    path: &Path,
    package_id: &str,
    version: &str,
    url: &str,
) -> Result<(), VisorError> {
    let receipt = InstallReceipt {
        package_id: package_id.to_string(),
        version: version.to_string(),
        url: url.to_string(),
        installed_at: Utc::now(),
    };
    let body = serde_json::to_string_pretty(&receipt)
        .map_err(|err| VisorError::io("failed to encode install receipt", err.into()))?;
    fs::write(path, body)
        .map_err(|err| VisorError::io("failed to write install receipt", err))
}
