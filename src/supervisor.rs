//! Start, stop and status probing for installed instances.
//!
//! Nothing here is cached: each call enumerates the process table again.
//! There is no crash-restart policy; an instance that dies stays down until
//! it is started again.
use serde::Serialize;
use std::{io, path::PathBuf, thread, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    catalog::{Catalog, Platform},
    constants::{STOP_CHECK_INTERVAL, STOP_EXIT_CHECKS},
    error::{VisorError, Warning, WarningKind},
    family::{Instance, Lifecycle, lifecycle_for},
    lock::{InstanceLock, LockScope},
    logs,
    process::{Launcher, ProcessInfo, ProcessTable, find_matching},
    runtime::RuntimeLayout,
};

/// Live state of one instance, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub package_id: String,
    pub name: String,
    pub version: String,
    /// For runtimes and tools: the executable is present.
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub install_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// `false` for packages that never run as a background process.
    pub daemon: bool,
}

/// What a start did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A detached process was launched.
    Spawned { pid: u32 },
    /// Runtime or tool: nothing to launch, the executable is present.
    Available,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    #[serde(flatten)]
    pub outcome: StartOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// What a stop did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// No matching process was found.
    NotRunning,
    /// Runtime or tool: nothing to stop.
    NotADaemon,
    /// The matching processes are gone.
    Stopped {
        pids: Vec<u32>,
        /// Forceful termination was needed.
        forced: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    #[serde(flatten)]
    pub outcome: StopOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// Tail of an instance's log.
#[derive(Debug, Clone, Serialize)]
pub struct LogExcerpt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub content: String,
}

/// How long a stop waits for processes to exit after a successful graceful
/// command before terminating them.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    pub exit_checks: usize,
    pub check_interval: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            exit_checks: STOP_EXIT_CHECKS,
            check_interval: STOP_CHECK_INTERVAL,
        }
    }
}

/// Drives the lifecycle of installed instances.
pub struct Supervisor<'a> {
    catalog: &'a Catalog,
    layout: &'a RuntimeLayout,
    platform: Platform,
    launcher: &'a dyn Launcher,
    processes: &'a dyn ProcessTable,
    stop_policy: StopPolicy,
}

impl<'a> Supervisor<'a> {
    pub fn new(
        catalog: &'a Catalog,
        layout: &'a RuntimeLayout,
        platform: Platform,
        launcher: &'a dyn Launcher,
        processes: &'a dyn ProcessTable,
    ) -> Self {
        Self {
            catalog,
            layout,
            platform,
            launcher,
            processes,
            stop_policy: StopPolicy::default(),
        }
    }

    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    fn installed_instance<'p>(
        &'p self,
        package_id: &str,
        version: &'p str,
    ) -> Result<(Instance<'p>, &'static dyn Lifecycle), VisorError> {
        let package = self.catalog.require(package_id)?;
        let instance = Instance::locate(package, version, self.layout, &self.platform);
        if !instance.is_installed() {
            return Err(VisorError::NotInstalled {
                package: package_id.to_string(),
                version: version.to_string(),
            });
        }
        Ok((instance, lifecycle_for(package.family)))
    }

    fn running_processes(
        &self,
        instance: &Instance<'_>,
        lifecycle: &dyn Lifecycle,
    ) -> Vec<ProcessInfo> {
        let names = lifecycle.process_names(instance);
        if names.is_empty() {
            return Vec::new();
        }
        find_matching(self.processes, &names, &instance.install_dir)
    }

    /// Probes one instance.
    pub fn status(&self, package_id: &str, version: &str) -> Result<ServiceStatus, VisorError> {
        let (instance, lifecycle) = self.installed_instance(package_id, version)?;
        Ok(self.describe(&instance, lifecycle))
    }

    fn describe(&self, instance: &Instance<'_>, lifecycle: &dyn Lifecycle) -> ServiceStatus {
        let package = instance.package;
        let (running, pid) = if lifecycle.is_daemon() {
            let pid = self
                .running_processes(instance, lifecycle)
                .first()
                .map(|p| p.pid);
            (pid.is_some(), pid)
        } else {
            let available = lifecycle
                .executable(instance)
                .is_ok_and(|path| path.is_file());
            (available, None)
        };

        ServiceStatus {
            package_id: package.id.clone(),
            name: package.name.clone(),
            version: instance.version.to_string(),
            running,
            pid,
            port: package.primary_port(),
            install_path: instance.install_dir.clone(),
            config_path: lifecycle.config_path(instance),
            log_path: lifecycle.log_path(instance),
            daemon: lifecycle.is_daemon(),
        }
    }

    /// Probes every instance directory found under the base dir.
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        let mut statuses = Vec::new();
        for package in self.catalog.packages() {
            for version in self.layout.installed_versions(&package.install_subpath) {
                let instance = Instance::locate(package, &version, self.layout, &self.platform);
                statuses.push(self.describe(&instance, lifecycle_for(package.family)));
            }
        }
        statuses
    }

    /// Starts one instance.
    ///
    /// Starting an instance that is already running is not refused; the
    /// report carries an `AlreadyRunning` warning.
    pub fn start(&self, package_id: &str, version: &str) -> Result<StartReport, VisorError> {
        let (instance, lifecycle) = self.installed_instance(package_id, version)?;
        let _lock = InstanceLock::acquire(self.layout, package_id, version, LockScope::Service)?;
        self.start_locked(&instance, lifecycle)
    }

    fn start_locked(
        &self,
        instance: &Instance<'_>,
        lifecycle: &dyn Lifecycle,
    ) -> Result<StartReport, VisorError> {
        let label = instance.label();
        let executable = lifecycle.executable(instance)?;
        if !executable.is_file() {
            return Err(VisorError::ExecutableMissing { path: executable });
        }

        if !lifecycle.is_daemon() {
            debug!("{label} is not a daemon; nothing to launch");
            return Ok(StartReport {
                outcome: StartOutcome::Available,
                warnings: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        let running = self.running_processes(instance, lifecycle);
        if let Some(existing) = running.first() {
            warnings.push(Warning::new(
                WarningKind::AlreadyRunning,
                format!("{label} is already running (PID {})", existing.pid),
            ));
        }

        let start_failed = |source: io::Error| VisorError::ServiceStartError {
            service: label.clone(),
            source,
        };

        if let Some(init) = lifecycle.prepare(instance).map_err(start_failed)? {
            info!("Initializing {label}: {init}");
            if let Err(err) = self.launcher.run(&init) {
                warnings.push(Warning::new(
                    WarningKind::InitializationFailed,
                    format!("initialization of {label} failed: {err}"),
                ));
            }
        }

        let command = lifecycle.start_command(instance, &executable);
        let log_path = self
            .layout
            .process_log_path(&instance.package.id, instance.version);
        info!("Starting {label}: {command}");
        let pid = self
            .launcher
            .spawn_detached(&command, &log_path)
            .map_err(start_failed)?;
        info!("Started {label} with PID {pid}");

        Ok(StartReport {
            outcome: StartOutcome::Spawned { pid },
            warnings,
        })
    }

    /// Stops one instance. Stopping an instance that is not running succeeds.
    pub fn stop(&self, package_id: &str, version: &str) -> Result<StopReport, VisorError> {
        let (instance, lifecycle) = self.installed_instance(package_id, version)?;
        let _lock = InstanceLock::acquire(self.layout, package_id, version, LockScope::Service)?;
        self.stop_locked(&instance, lifecycle)
    }

    fn stop_locked(
        &self,
        instance: &Instance<'_>,
        lifecycle: &dyn Lifecycle,
    ) -> Result<StopReport, VisorError> {
        let label = instance.label();
        if !lifecycle.is_daemon() {
            return Ok(StopReport {
                outcome: StopOutcome::NotADaemon,
                warnings: Vec::new(),
            });
        }

        let running = self.running_processes(instance, lifecycle);
        if running.is_empty() {
            info!("{label} is not running");
            return Ok(StopReport {
                outcome: StopOutcome::NotRunning,
                warnings: Vec::new(),
            });
        }
        let pids: Vec<u32> = running.iter().map(|p| p.pid).collect();

        let mut warnings = Vec::new();
        if let Some(command) = lifecycle.stop_command(instance) {
            info!("Stopping {label}: {command}");
            match self.launcher.run(&command) {
                Ok(()) => {
                    if self.wait_for_exit(instance, lifecycle) {
                        info!("{label} stopped");
                        return Ok(StopReport {
                            outcome: StopOutcome::Stopped { pids, forced: false },
                            warnings,
                        });
                    }
                    warn!("{label} still running after shutdown command; terminating");
                }
                Err(err) => warnings.push(Warning::new(
                    WarningKind::GracefulStopFailed,
                    format!("shutdown command for {label} failed: {err}"),
                )),
            }
        }

        let killed = self.force_stop(instance, lifecycle)?;
        let pids = if killed.is_empty() { pids } else { killed };
        info!("{label} terminated");
        Ok(StopReport {
            outcome: StopOutcome::Stopped { pids, forced: true },
            warnings,
        })
    }

    /// Polls until no matching process remains; `false` on timeout.
    fn wait_for_exit(&self, instance: &Instance<'_>, lifecycle: &dyn Lifecycle) -> bool {
        for _ in 0..=self.stop_policy.exit_checks {
            if self.running_processes(instance, lifecycle).is_empty() {
                return true;
            }
            thread::sleep(self.stop_policy.check_interval);
        }
        false
    }

    fn force_stop(
        &self,
        instance: &Instance<'_>,
        lifecycle: &dyn Lifecycle,
    ) -> Result<Vec<u32>, VisorError> {
        let mut killed = Vec::new();
        for process in self.running_processes(instance, lifecycle) {
            debug!("Killing {} (PID {})", process.name, process.pid);
            self.processes
                .kill(process.pid)
                .map_err(|source| VisorError::ServiceStopError {
                    service: instance.label(),
                    source,
                })?;
            killed.push(process.pid);
        }
        Ok(killed)
    }

    /// Stop followed by start under one lock. A failed stop becomes a
    /// warning; the start is attempted regardless.
    pub fn restart(&self, package_id: &str, version: &str) -> Result<StartReport, VisorError> {
        let (instance, lifecycle) = self.installed_instance(package_id, version)?;
        let _lock = InstanceLock::acquire(self.layout, package_id, version, LockScope::Service)?;

        let mut warnings = match self.stop_locked(&instance, lifecycle) {
            Ok(report) => report.warnings,
            Err(err) => vec![Warning::new(
                WarningKind::RestartStopFailed,
                format!("stop of {} failed: {err}", instance.label()),
            )],
        };

        let mut report = self.start_locked(&instance, lifecycle)?;
        warnings.append(&mut report.warnings);
        report.warnings = warnings;
        Ok(report)
    }

    /// Last `lines` lines of the instance's log.
    ///
    /// Falls back to the captured output of the detached process when the
    /// family defines no log of its own.
    pub fn read_log(
        &self,
        package_id: &str,
        version: &str,
        lines: usize,
    ) -> Result<LogExcerpt, VisorError> {
        let package = self.catalog.require(package_id)?;
        let instance = Instance::locate(package, version, self.layout, &self.platform);
        let family_log = lifecycle_for(package.family).log_path(&instance);
        let process_log = self.layout.process_log_path(package_id, version);

        let candidate = match &family_log {
            Some(path) if path.is_file() => Some(path.clone()),
            _ if process_log.is_file() => Some(process_log),
            _ => None,
        };

        let Some(path) = candidate else {
            let content = if family_log.is_some() {
                "Log file is empty or does not exist yet."
            } else {
                "No log file defined for this service."
            };
            return Ok(LogExcerpt {
                path: family_log,
                content: content.to_string(),
            });
        };

        let content = logs::tail_lines(&path, lines)
            .map_err(|err| VisorError::io(format!("failed to read {}", path.display()), err))?;
        Ok(LogExcerpt {
            path: Some(path),
            content,
        })
    }
}
