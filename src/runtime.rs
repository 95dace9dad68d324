//! Runtime paths for installed bundles.
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::constants::{
    BASE_DIR_ENV, DEFAULT_BASE_DIR_NAME, LOCK_SUFFIX, RECEIPT_FILE_NAME,
    REGISTRY_FILE_NAME, SCRATCH_DIR_NAME, STATE_DIR_NAME,
};

/// Filesystem layout rooted at the base directory.
///
/// ```text
/// {base}/{install_subpath}/{version}/...   installed instances
/// {base}/.temp/                            in-flight downloads
/// {base}/.pkgvisor/installed.json          metadata registry
/// {base}/.pkgvisor/locks/                  per-instance lock files
/// {base}/.pkgvisor/logs/                   detached process output
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    base_dir: PathBuf,
}

impl RuntimeLayout {
    /// Creates a layout rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Resolves the base directory: explicit override, then `PKGVISOR_BASE_DIR`,
    /// then the settings file, then `server/` next to the running executable.
    pub fn resolve(explicit: Option<&Path>, configured: Option<&Path>) -> Self {
        if let Some(path) = explicit {
            return Self::new(path);
        }

        if let Some(value) = env::var_os(BASE_DIR_ENV)
            && !value.is_empty()
        {
            return Self::new(PathBuf::from(value));
        }

        match configured {
            Some(path) => Self::new(path),
            None => Self::new(Self::executable_relative()),
        }
    }

    fn executable_relative() -> PathBuf {
        match env::current_exe() {
            Ok(exe) => exe
                .parent()
                .map(|dir| dir.join(DEFAULT_BASE_DIR_NAME))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR_NAME)),
            Err(_) => PathBuf::from(".").join(DEFAULT_BASE_DIR_NAME),
        }
    }

    /// Root of all installations.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory for one installed instance.
    pub fn install_dir(&self, install_subpath: &str, version: &str) -> PathBuf {
        self.package_root(install_subpath).join(version)
    }

    /// Directory holding every version of one package.
    pub fn package_root(&self, install_subpath: &str) -> PathBuf {
        install_subpath
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.base_dir.clone(), |path, part| path.join(part))
    }

    /// Version directories present under a package root, sorted by name.
    pub fn installed_versions(&self, install_subpath: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.package_root(install_subpath)) else {
            return Vec::new();
        };
        let mut versions: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|ty| ty.is_dir()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        versions.sort();
        versions
    }

    /// Scratch area for downloads.
    pub fn scratch_dir(&self) -> PathBuf {
        self.base_dir.join(SCRATCH_DIR_NAME)
    }

    /// State dir (registry, locks, logs).
    pub fn state_dir(&self) -> PathBuf {
        self.base_dir.join(STATE_DIR_NAME)
    }

    /// Metadata registry file.
    pub fn registry_path(&self) -> PathBuf {
        self.state_dir().join(REGISTRY_FILE_NAME)
    }

    /// Lock directory.
    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir().join("locks")
    }

    /// Lock file for one instance and scope.
    pub fn lock_path(&self, package_id: &str, version: &str, scope: &str) -> PathBuf {
        self.lock_dir()
            .join(format!("{package_id}-{version}.{scope}{LOCK_SUFFIX}"))
    }

    /// Log directory for detached process output.
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    /// Output log of one detached instance.
    pub fn process_log_path(&self, package_id: &str, version: &str) -> PathBuf {
        self.log_dir().join(format!("{package_id}-{version}.log"))
    }

    /// Completion receipt inside an instance directory.
    pub fn receipt_path(&self, install_subpath: &str, version: &str) -> PathBuf {
        self.install_dir(install_subpath, version)
            .join(RECEIPT_FILE_NAME)
    }
}
