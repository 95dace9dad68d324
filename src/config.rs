//! Configuration management for pkgvisor.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::{
    catalog::Catalog,
    constants::{DEFAULT_SETTINGS_FILE, DEFAULT_USER_AGENT},
    error::VisorError,
};

/// Represents the structure of the settings file.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Root of all installations; defaults to `server/` next to the executable.
    pub base_dir: Option<PathBuf>,
    /// Extra catalog file merged over the built-in catalog.
    pub catalog: Option<PathBuf>,
    /// Download behaviour.
    #[serde(default)]
    pub download: DownloadSettings,
    /// Directory from which relative paths are resolved.
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
}

/// Settings for the download stage.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSettings {
    /// `User-Agent` header sent with each request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Verify sha256 digests when the catalog records them.
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            verify_checksums: true,
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_true() -> bool {
    true
}

impl Settings {
    fn resolve_relative(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.project_dir {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Base directory from the settings file, resolved against its location.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.base_dir.as_deref().map(|p| self.resolve_relative(p))
    }

    /// Builds the catalog: built-in entries plus the optional extra file.
    pub fn build_catalog(&self) -> Result<Catalog, VisorError> {
        let builtin = Catalog::builtin();
        match self.catalog.as_deref() {
            Some(path) => {
                let extra = Catalog::from_file(&self.resolve_relative(path))?;
                Ok(builtin.overlay(extra))
            }
            None => Ok(builtin),
        }
    }
}

/// Expands `$VAR` and `${VAR}` references within a string.
fn expand_env_vars(input: &str) -> Result<String, VisorError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .map_err(|err| VisorError::io("invalid expansion pattern", std::io::Error::other(err)))?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(VisorError::MissingEnvVar(name)),
        None => Ok(result.to_string()),
    }
}

/// Loads and parses the settings file, expanding environment variables.
///
/// An explicit path must exist. Without one, `pkgvisor.yaml` in the working
/// directory is used when present and defaults apply otherwise.
pub fn load_settings(settings_path: Option<&str>) -> Result<Settings, VisorError> {
    let path = match settings_path {
        Some(path) => PathBuf::from(path),
        None => {
            let candidate = PathBuf::from(DEFAULT_SETTINGS_FILE);
            if !candidate.exists() {
                return Ok(Settings::default());
            }
            candidate
        }
    };

    let content =
        fs::read_to_string(&path).map_err(|source| VisorError::SettingsReadError {
            path: path.clone(),
            source,
        })?;

    let expanded = expand_env_vars(&content)?;
    let mut settings: Settings = if expanded.trim().is_empty() {
        Settings::default()
    } else {
        serde_yaml::from_str(&expanded).map_err(|source| VisorError::SettingsParseError {
            path: path.clone(),
            source,
        })?
    };

    let base_path = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    settings.project_dir = Some(base_path);
    Ok(settings)
}
