//! pkgvisor installs portable server bundles (databases, web servers, language
//! runtimes and tools) from a built-in catalog into a self-contained directory
//! tree, and starts, stops and probes them without the system package manager.

/// Archive unpacking.
pub mod archive;

/// Package catalog and download resolution.
pub mod catalog;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared constants.
pub mod constants;

/// HTTP downloads.
pub mod download;

/// Error handling.
pub mod error;

/// Per-family lifecycle strategies.
pub mod family;

/// Install orchestration.
pub mod installer;

/// Cross-process instance locks.
pub mod lock;

/// Log tailing.
pub mod logs;

/// Process launching and discovery.
pub mod process;

/// Installed-package metadata registry.
pub mod registry;

/// Filesystem layout.
pub mod runtime;

/// Package configuration files.
pub mod service_config;

/// Start, stop and status of installed instances.
pub mod supervisor;

/// Helpers shared by unit and integration tests.
pub mod test_utils;
