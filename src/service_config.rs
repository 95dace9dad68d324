//! Reading and writing package configuration files.
use serde::Serialize;
use std::{fs, io, path::PathBuf};
use tracing::{debug, info};

use crate::{
    catalog::{Catalog, Platform},
    error::VisorError,
    family::{Instance, lifecycle_for},
    runtime::RuntimeLayout,
};

/// Config file content together with its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigDocument {
    pub path: PathBuf,
    pub content: String,
    /// `false` when `content` is the synthesized default.
    pub exists: bool,
}

/// Access to the config file of installed instances.
#[derive(Debug, Clone)]
pub struct ConfigManager<'a> {
    catalog: &'a Catalog,
    layout: &'a RuntimeLayout,
    platform: Platform,
}

impl<'a> ConfigManager<'a> {
    pub fn new(catalog: &'a Catalog, layout: &'a RuntimeLayout, platform: Platform) -> Self {
        Self {
            catalog,
            layout,
            platform,
        }
    }

    /// Config file location for one instance; `NoConfigFile` when the package
    /// has none.
    pub fn config_path(&self, package_id: &str, version: &str) -> Result<PathBuf, VisorError> {
        let package = self.catalog.require(package_id)?;
        let instance = Instance::locate(package, version, self.layout, &self.platform);
        lifecycle_for(package.family)
            .config_path(&instance)
            .ok_or_else(|| VisorError::NoConfigFile {
                package: package_id.to_string(),
            })
    }

    /// Returns the on-disk config, or the family default when the file does
    /// not exist yet. Nothing is written.
    pub fn read(&self, package_id: &str, version: &str) -> Result<ConfigDocument, VisorError> {
        let package = self.catalog.require(package_id)?;
        let instance = Instance::locate(package, version, self.layout, &self.platform);
        let lifecycle = lifecycle_for(package.family);
        let path = lifecycle
            .config_path(&instance)
            .ok_or_else(|| VisorError::NoConfigFile {
                package: package_id.to_string(),
            })?;

        match fs::read_to_string(&path) {
            Ok(content) => Ok(ConfigDocument {
                path,
                content,
                exists: true,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No config at {}; returning default", path.display());
                Ok(ConfigDocument {
                    content: lifecycle.default_config(&instance).unwrap_or_default(),
                    path,
                    exists: false,
                })
            }
            Err(source) => Err(VisorError::ConfigReadFailed { path, source }),
        }
    }

    /// Overwrites the config file of an installed instance. The content is not
    /// validated.
    pub fn write(
        &self,
        package_id: &str,
        version: &str,
        content: &str,
    ) -> Result<PathBuf, VisorError> {
        let package = self.catalog.require(package_id)?;
        let instance = Instance::locate(package, version, self.layout, &self.platform);
        if !instance.is_installed() {
            return Err(VisorError::NotInstalled {
                package: package_id.to_string(),
                version: version.to_string(),
            });
        }

        let path = lifecycle_for(package.family)
            .config_path(&instance)
            .ok_or_else(|| VisorError::NoConfigFile {
                package: package_id.to_string(),
            })?;
        write_config(&path, content)?;
        info!("Wrote config for {} to {}", instance.label(), path.display());
        Ok(path)
    }
}

/// Writes the family default for `instance` unless a config file already
/// exists. Returns the written path.
pub fn ensure_default_config(instance: &Instance<'_>) -> Result<Option<PathBuf>, VisorError> {
    let lifecycle = lifecycle_for(instance.package.family);
    let Some(path) = lifecycle.config_path(instance) else {
        return Ok(None);
    };
    if path.exists() {
        debug!("Keeping existing config {}", path.display());
        return Ok(None);
    }
    let Some(content) = lifecycle.default_config(instance) else {
        return Ok(None);
    };
    write_config(&path, &content)?;
    Ok(Some(path))
}

fn write_config(path: &std::path::Path, content: &str) -> Result<(), VisorError> {
    let failed = |source| VisorError::ConfigWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(failed)?;
    }
    fs::write(path, content).map_err(failed)
}
