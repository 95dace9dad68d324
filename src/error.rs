//! Error handling for pkgvisor.
use serde::Serialize;
use std::path::PathBuf;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Machine-readable classification of a [`VisorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
pub enum ErrorKind {
    PackageNotFound,
    VersionNotFound,
    NoDownloadForPlatform,
    DownloadFailed,
    ExtractionFailed,
    UnsupportedFormat,
    ConfigWriteFailed,
    ConfigReadFailed,
    NoConfigFile,
    NotInstalled,
    DeleteFailed,
    StartFailed,
    StopFailed,
    SettingsInvalid,
    LockFailed,
    Io,
}

/// Defines all possible errors raised by the install and supervise pipeline.
#[derive(Debug, Error)]
pub enum VisorError {
    /// The package id is not present in the catalog.
    #[error("package not found: {package}")]
    PackageNotFound {
        /// The requested package id.
        package: String,
    },

    /// The package exists but does not list the requested version.
    #[error("version {version} not found for package {package}")]
    VersionNotFound {
        /// The package id.
        package: String,
        /// The requested version string.
        version: String,
    },

    /// Neither the platform key nor the `all` key has a download location.
    #[error("no download available for {package} {version} on {platform}")]
    NoDownloadForPlatform {
        /// The package id.
        package: String,
        /// The requested version string.
        version: String,
        /// The `{os}/{arch}` key that was looked up.
        platform: String,
    },

    /// The server answered with a non-success status.
    #[error("download failed for {url}: HTTP {status}")]
    DownloadStatus {
        /// The requested location.
        url: String,
        /// The HTTP status code returned.
        status: u16,
    },

    /// The transfer or the local write failed.
    #[error("download failed for {url}: {source}")]
    DownloadFailed {
        /// The requested location.
        url: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The downloaded archive does not match the catalog checksum.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The requested location.
        url: String,
        /// Checksum recorded in the catalog.
        expected: String,
        /// Checksum of the downloaded bytes.
        actual: String,
    },

    /// The archive suffix is not one of the supported formats.
    #[error("unsupported archive format: {}", path.display())]
    UnsupportedFormat {
        /// The archive path.
        path: PathBuf,
    },

    /// Unpacking failed partway through.
    #[error("failed to extract {}: {source}", archive.display())]
    ExtractionFailed {
        /// The archive path.
        archive: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// An archive entry would escape the destination directory.
    #[error("archive {} contains unsafe entry '{entry}'", archive.display())]
    UnsafeEntry {
        /// The archive path.
        archive: PathBuf,
        /// The offending entry name.
        entry: String,
    },

    /// Writing a package configuration file failed.
    #[error("failed to write config {}: {source}", path.display())]
    ConfigWriteFailed {
        /// The config file path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Reading an existing package configuration file failed.
    #[error("failed to read config {}: {source}", path.display())]
    ConfigReadFailed {
        /// The config file path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The package has no configuration file at all.
    #[error("no config file for {package}")]
    NoConfigFile {
        /// The package id.
        package: String,
    },

    /// The instance directory does not exist.
    #[error("package not installed: {package} {version}")]
    NotInstalled {
        /// The package id.
        package: String,
        /// The version string.
        version: String,
    },

    /// The instance directory exists but its executable does not.
    #[error("executable not found: {}", path.display())]
    ExecutableMissing {
        /// Where the executable was expected.
        path: PathBuf,
    },

    /// The package defines no executable for this platform.
    #[error("no executable defined for {package} on {os}")]
    NoExecutable {
        /// The package id.
        package: String,
        /// The operating system key.
        os: String,
    },

    /// Removing the instance directory failed.
    #[error("failed to delete {}: {source}", path.display())]
    DeleteFailed {
        /// The instance directory.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error spawning a service process.
    #[error("Failed to start service '{service}': {source}")]
    ServiceStartError {
        /// The instance label that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error stopping a service process.
    #[error("Failed to stop service '{service}': {source}")]
    ServiceStopError {
        /// The instance label that failed to stop.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error reading the settings or an extra catalog file.
    #[error("Failed to read settings file {}: {source}", path.display())]
    SettingsReadError {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML or JSON settings.
    #[error("Invalid settings in {}: {source}", path.display())]
    SettingsParseError {
        /// The file that could not be parsed.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: serde_yaml::Error,
    },

    /// A settings value referenced an undefined environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Acquiring an instance lock failed.
    #[error("failed to lock {}: {source}", path.display())]
    LockFailed {
        /// The lock file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Any other filesystem failure, with a short description of the step.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

impl VisorError {
    /// Returns the machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PackageNotFound { .. } => ErrorKind::PackageNotFound,
            Self::VersionNotFound { .. } => ErrorKind::VersionNotFound,
            Self::NoDownloadForPlatform { .. } => ErrorKind::NoDownloadForPlatform,
            Self::DownloadStatus { .. }
            | Self::DownloadFailed { .. }
            | Self::ChecksumMismatch { .. } => ErrorKind::DownloadFailed,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::ExtractionFailed { .. } | Self::UnsafeEntry { .. } => {
                ErrorKind::ExtractionFailed
            }
            Self::ConfigWriteFailed { .. } => ErrorKind::ConfigWriteFailed,
            Self::ConfigReadFailed { .. } => ErrorKind::ConfigReadFailed,
            Self::NoConfigFile { .. } => ErrorKind::NoConfigFile,
            Self::NotInstalled { .. }
            | Self::ExecutableMissing { .. }
            | Self::NoExecutable { .. } => ErrorKind::NotInstalled,
            Self::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            Self::ServiceStartError { .. } => ErrorKind::StartFailed,
            Self::ServiceStopError { .. } => ErrorKind::StopFailed,
            Self::SettingsReadError { .. }
            | Self::SettingsParseError { .. }
            | Self::MissingEnvVar(_) => ErrorKind::SettingsInvalid,
            Self::LockFailed { .. } => ErrorKind::LockFailed,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Wraps an I/O error with a short description of the failed step.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Error type for the installed-package registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Error reading or writing the registry file.
    #[error("Failed to access install registry: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing JSON contents of the registry.
    #[error("Failed to parse install registry: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Attempted to remove an entry that is not recorded.
    #[error("Instance not found in install registry")]
    NotFound,
}

/// Category of a degraded-but-successful outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WarningKind {
    /// The metadata registry could not record a finished install.
    MetadataRecordFailed,
    /// The metadata registry could not drop an uninstalled instance.
    MetadataRemoveFailed,
    /// The scratch archive could not be removed after extraction.
    ScratchCleanupFailed,
    /// The instance was already fully installed; nothing was done.
    AlreadyInstalled,
    /// A start was requested for an instance that is already running.
    AlreadyRunning,
    /// The one-time data directory initialization did not succeed.
    InitializationFailed,
    /// The graceful shutdown command failed or was unavailable.
    GracefulStopFailed,
    /// The stop step of a restart failed; start was still attempted.
    RestartStopFailed,
}

/// A non-fatal problem surfaced alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// Machine-readable category.
    pub kind: WarningKind,
    /// Human-readable detail.
    pub message: String,
}

impl Warning {
    /// Creates a warning and mirrors it to the log.
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!("{kind}: {message}");
        Self { kind, message }
    }
}
