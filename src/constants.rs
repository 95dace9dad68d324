//! Constants and configuration values for pkgvisor.
//!
//! This module centralizes the magic numbers and names shared by the install
//! pipeline and the supervisor.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Directory next to the executable that holds every installed bundle.
pub const DEFAULT_BASE_DIR_NAME: &str = "server";

/// Scratch directory (under the base dir) for in-flight downloads.
pub const SCRATCH_DIR_NAME: &str = ".temp";

/// State directory (under the base dir) for the registry, locks and logs.
pub const STATE_DIR_NAME: &str = ".pkgvisor";

/// Name of the metadata registry stored in the state directory.
pub const REGISTRY_FILE_NAME: &str = "installed.json";

/// Marker written into an instance directory once its install completed.
pub const RECEIPT_FILE_NAME: &str = ".pkgvisor-receipt.json";

/// Default settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "pkgvisor.yaml";

/// Environment variable overriding the base directory.
pub const BASE_DIR_ENV: &str = "PKGVISOR_BASE_DIR";

/// Suffix of per-instance lock files.
pub const LOCK_SUFFIX: &str = ".lock";

// ============================================================================
// Download Constants
// ============================================================================

/// Size of each chunk copied from the response body to disk.
pub const DOWNLOAD_CHUNK_SIZE: usize = 32 * 1024;

/// Default `User-Agent` sent with downloads.
pub const DEFAULT_USER_AGENT: &str = concat!("pkgvisor/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Install Progress Bands
// ============================================================================

/// Upper bound of the download band (0..=50).
pub const PROGRESS_DOWNLOAD_END: f64 = 50.0;

/// Progress reported when extraction begins.
pub const PROGRESS_EXTRACT_START: f64 = 50.0;

/// Progress reported when configuration begins.
pub const PROGRESS_CONFIGURE_START: f64 = 90.0;

/// Terminal progress value.
pub const PROGRESS_COMPLETE: f64 = 100.0;

// ============================================================================
// Service Constants
// ============================================================================

/// Loopback address the FastCGI gateway binds to.
pub const FASTCGI_BIND: &str = "127.0.0.1:9000";

/// Default MySQL/MariaDB port when the catalog declares none.
pub const DEFAULT_DB_PORT: u16 = 3306;

/// Default Redis port when the catalog declares none.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Primary data file whose absence triggers database initialization.
pub const DB_PRIMARY_DATA_FILE: &str = "ibdata1";

/// Number of exit checks after a graceful stop command succeeded.
pub const STOP_EXIT_CHECKS: usize = 20;

/// Delay between exit checks.
pub const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Default number of log lines returned by `read_log`.
pub const DEFAULT_LOG_LINES: usize = 200;
