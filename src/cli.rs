//! Command-line interface for pkgvisor.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::constants::DEFAULT_LOG_LINES;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for pkgvisor.
#[derive(Parser)]
#[command(name = "pkgv", version, author)]
#[command(about = "Install and supervise bundled server packages", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the settings file (defaults to `pkgvisor.yaml` when present).
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<String>,

    /// Root directory of all installations.
    #[arg(long, value_name = "DIR", global = true)]
    pub base_dir: Option<PathBuf>,

    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for pkgv.
#[derive(Subcommand)]
pub enum Commands {
    /// List catalog packages.
    Catalog {
        /// Only list one category (`all` lists everything).
        #[arg(long)]
        category: Option<String>,
    },

    /// Show where a package would be downloaded from and installed to.
    Preview {
        /// Package id.
        package: String,
        /// Catalog version.
        version: String,
    },

    /// Download and install a package version.
    Install {
        /// Package id.
        package: String,
        /// Catalog version.
        version: String,

        /// Reinstall even when the version is already installed.
        #[arg(long)]
        force: bool,
    },

    /// Remove an installed package version.
    Uninstall {
        /// Package id.
        package: String,
        /// Installed version.
        version: String,
    },

    /// List installed instances.
    Installed,

    /// Show whether instances are running.
    Status {
        /// Package id; omit to show every installed instance.
        #[arg(requires = "version")]
        package: Option<String>,
        /// Installed version.
        version: Option<String>,
    },

    /// Start an installed instance.
    Start {
        /// Package id.
        package: String,
        /// Installed version.
        version: String,
    },

    /// Stop a running instance.
    Stop {
        /// Package id.
        package: String,
        /// Installed version.
        version: String,
    },

    /// Stop then start an instance.
    Restart {
        /// Package id.
        package: String,
        /// Installed version.
        version: String,
    },

    /// Read or replace an instance's configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Show the tail of an instance's log.
    Logs {
        /// Package id.
        package: String,
        /// Installed version.
        version: String,

        /// Number of lines to show.
        #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_LINES)]
        lines: usize,
    },
}

/// `pkgv config` actions.
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the config file, or the default that would be used.
    Show {
        /// Package id.
        package: String,
        /// Version.
        version: String,
    },

    /// Replace the config file with the contents of another file.
    Set {
        /// Package id.
        package: String,
        /// Installed version.
        version: String,

        /// File holding the new contents (`-` reads stdin).
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
