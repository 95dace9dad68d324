#[path = "common/mod.rs"]
mod common;

use std::{
    fs, io,
    path::Path,
    sync::Mutex,
    time::Duration,
};

use common::linux;
use pkgvisor::{
    catalog::Catalog,
    constants::DB_PRIMARY_DATA_FILE,
    error::ErrorKind,
    process::{CommandSpec, Launcher, ProcessInfo, ProcessTable},
    runtime::RuntimeLayout,
    supervisor::{StartOutcome, StopOutcome, StopPolicy, Supervisor},
};
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Run(CommandSpec),
    Spawn(CommandSpec),
}

/// Records launches in order without starting anything.
#[derive(Default)]
struct RecordingLauncher {
    events: Mutex<Vec<Event>>,
}

impl RecordingLauncher {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Launcher for RecordingLauncher {
    fn run(&self, command: &CommandSpec) -> io::Result<()> {
        self.events.lock().unwrap().push(Event::Run(command.clone()));
        Ok(())
    }

    fn spawn_detached(&self, command: &CommandSpec, _log_path: &Path) -> io::Result<u32> {
        self.events.lock().unwrap().push(Event::Spawn(command.clone()));
        Ok(1000)
    }
}

#[derive(Default)]
struct FakeTable {
    processes: Mutex<Vec<ProcessInfo>>,
}

impl FakeTable {
    fn add(&self, pid: u32, name: &str, exe: Option<&Path>) {
        self.processes.lock().unwrap().push(ProcessInfo {
            pid,
            name: name.to_string(),
            exe: exe.map(Path::to_path_buf),
        });
    }
}

impl ProcessTable for FakeTable {
    fn processes(&self) -> Vec<ProcessInfo> {
        self.processes.lock().unwrap().clone()
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        self.processes.lock().unwrap().retain(|p| p.pid != pid);
        Ok(())
    }
}

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "").unwrap();
}

fn args(command: &CommandSpec) -> Vec<String> {
    command
        .args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

fn quick() -> StopPolicy {
    StopPolicy {
        exit_checks: 2,
        check_interval: Duration::from_millis(1),
    }
}

#[test]
fn stop_without_matching_process_succeeds() {
    let temp = tempdir().expect("failed to create tempdir");
    let catalog = Catalog::builtin();
    let layout = RuntimeLayout::new(temp.path());
    touch(&layout.install_dir("webserver/nginx", "1.25.3").join("sbin/nginx"));
    let launcher = RecordingLauncher::default();
    let table = FakeTable::default();
    table.add(42, "nginx-helper", None);
    let supervisor = Supervisor::new(&catalog, &layout, linux(), &launcher, &table);

    let report = supervisor.stop("nginx", "1.25.3").expect("stop failed");
    assert_eq!(report.outcome, StopOutcome::NotRunning);
    assert!(launcher.events().is_empty());
}

#[test]
fn start_of_missing_instance_spawns_nothing() {
    let temp = tempdir().expect("failed to create tempdir");
    let catalog = Catalog::builtin();
    let layout = RuntimeLayout::new(temp.path());
    let launcher = RecordingLauncher::default();
    let table = FakeTable::default();
    let supervisor = Supervisor::new(&catalog, &layout, linux(), &launcher, &table);

    let err = supervisor.start("redis", "7.2.3").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotInstalled);
    assert!(launcher.events().is_empty());

    let unknown = supervisor.start("postgres", "16.1").unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::PackageNotFound);
}

#[test]
fn database_is_initialized_before_launch() {
    let temp = tempdir().expect("failed to create tempdir");
    let catalog = Catalog::builtin();
    let layout = RuntimeLayout::new(temp.path());
    let install_dir = layout.install_dir("database/mysql", "8.0.35");
    touch(&install_dir.join("bin/mysqld"));
    let launcher = RecordingLauncher::default();
    let table = FakeTable::default();
    let supervisor = Supervisor::new(&catalog, &layout, linux(), &launcher, &table);

    let report = supervisor.start("mysql", "8.0.35").expect("start failed");
    assert_eq!(report.outcome, StartOutcome::Spawned { pid: 1000 });

    let events = launcher.events();
    assert_eq!(events.len(), 2);
    let Event::Run(init) = &events[0] else {
        panic!("expected initialization first, got {events:?}");
    };
    assert!(args(init).contains(&"--initialize-insecure".to_string()));
    let Event::Spawn(daemon) = &events[1] else {
        panic!("expected daemon launch second, got {events:?}");
    };
    let daemon_args = args(daemon);
    assert!(daemon_args[0].starts_with("--defaults-file="));
    assert!(daemon_args.contains(&"--port=3306".to_string()));
    assert!(install_dir.join("my.cnf").is_file());

    touch(&install_dir.join("data").join(DB_PRIMARY_DATA_FILE));
    supervisor.start("mysql", "8.0.35").expect("second start failed");
    let events = launcher.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], Event::Spawn(_)));
}

#[test]
fn graceful_stop_precedes_termination() {
    let temp = tempdir().expect("failed to create tempdir");
    let catalog = Catalog::builtin();
    let layout = RuntimeLayout::new(temp.path());
    let install_dir = layout.install_dir("database/mariadb", "11.2.2");
    touch(&install_dir.join("bin/mariadbd"));
    touch(&install_dir.join("bin/mariadb-admin"));
    let launcher = RecordingLauncher::default();
    let table = FakeTable::default();
    table.add(300, "mariadbd", Some(&install_dir.join("bin/mariadbd")));
    table.add(301, "mariadbd", Some(Path::new("/usr/sbin/mariadbd")));
    let supervisor =
        Supervisor::new(&catalog, &layout, linux(), &launcher, &table).with_stop_policy(quick());

    let status = supervisor.status("mariadb", "11.2.2").unwrap();
    assert!(status.running);
    assert_eq!(status.pid, Some(300));

    let report = supervisor.stop("mariadb", "11.2.2").expect("stop failed");
    assert_eq!(
        report.outcome,
        StopOutcome::Stopped {
            pids: vec![300],
            forced: true
        }
    );

    let Event::Run(shutdown) = &launcher.events()[0] else {
        panic!("expected shutdown command");
    };
    assert!(shutdown.program.ends_with("bin/mariadb-admin"));
    assert_eq!(args(shutdown).last().map(String::as_str), Some("shutdown"));

    // The system-wide server outside the instance dir is left alone.
    assert_eq!(table.processes().len(), 1);
    assert_eq!(table.processes()[0].pid, 301);
}

#[test]
fn statuses_cover_daemons_and_runtimes() {
    let temp = tempdir().expect("failed to create tempdir");
    let catalog = Catalog::builtin();
    let layout = RuntimeLayout::new(temp.path());
    let nginx_dir = layout.install_dir("webserver/nginx", "1.25.3");
    touch(&nginx_dir.join("sbin/nginx"));
    touch(&layout.install_dir("runtime/nodejs", "20.10.0").join("bin/node"));
    fs::create_dir_all(layout.install_dir("runtime/nodejs", "18.19.0")).unwrap();
    let launcher = RecordingLauncher::default();
    let table = FakeTable::default();
    table.add(77, "nginx", Some(&nginx_dir.join("sbin/nginx")));
    let supervisor = Supervisor::new(&catalog, &layout, linux(), &launcher, &table);

    let statuses = supervisor.statuses();
    let summary: Vec<(&str, &str, bool)> = statuses
        .iter()
        .map(|s| (s.package_id.as_str(), s.version.as_str(), s.running))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("nodejs", "18.19.0", false),
            ("nodejs", "20.10.0", true),
            ("nginx", "1.25.3", true),
        ]
    );
    let nginx = statuses.iter().find(|s| s.package_id == "nginx").unwrap();
    assert_eq!(nginx.port, Some(80));
    assert!(nginx.config_path.as_ref().unwrap().ends_with("conf/nginx.conf"));
}

#[test]
fn restart_of_stopped_instance_only_starts() {
    let temp = tempdir().expect("failed to create tempdir");
    let catalog = Catalog::builtin();
    let layout = RuntimeLayout::new(temp.path());
    touch(&layout.install_dir("database/redis", "7.2.3").join("src/redis-server"));
    let launcher = RecordingLauncher::default();
    let table = FakeTable::default();
    let supervisor = Supervisor::new(&catalog, &layout, linux(), &launcher, &table);

    let report = supervisor.restart("redis", "7.2.3").expect("restart failed");
    assert!(report.warnings.is_empty());
    assert_eq!(launcher.events().len(), 1);
    assert!(matches!(launcher.events()[0], Event::Spawn(_)));
}

#[cfg(target_os = "linux")]
#[test]
fn detached_process_is_found_and_killed() {
    use common::{catalog_of, package};
    use pkgvisor::{
        catalog::{Platform, ServiceFamily},
        process::{SysinfoProcessTable, SystemLauncher},
    };
    use std::{os::unix::fs::PermissionsExt, thread, time::Instant};

    let temp = tempdir().expect("failed to create tempdir");
    let layout = RuntimeLayout::new(temp.path());
    let catalog = catalog_of(vec![package(
        "pkgv-sleeper",
        "addons/sleeper",
        ServiceFamily::Generic,
        Some("bin/pkgv-sleeper"),
        "1.0",
        "https://downloads.invalid/sleeper.tar.gz",
    )]);
    let script = layout
        .install_dir("addons/sleeper", "1.0")
        .join("bin/pkgv-sleeper");
    fs::create_dir_all(script.parent().unwrap()).unwrap();
    fs::write(&script, "#!/bin/sh\nwhile :; do sleep 1; done\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let launcher = SystemLauncher;
    let table = SysinfoProcessTable;
    let supervisor = Supervisor::new(&catalog, &layout, Platform::current(), &launcher, &table);

    let started = supervisor.start("pkgv-sleeper", "1.0").expect("start failed");
    let StartOutcome::Spawned { pid } = started.outcome else {
        panic!("expected a spawned process");
    };

    let wait_for = |running: bool| {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = supervisor.status("pkgv-sleeper", "1.0").unwrap();
            if status.running == running {
                return status;
            }
            if Instant::now() >= deadline {
                panic!("timed out waiting for running={running}");
            }
            thread::sleep(Duration::from_millis(100));
        }
    };

    let status = wait_for(true);
    assert_eq!(status.pid, Some(pid));
    assert!(layout.process_log_path("pkgv-sleeper", "1.0").exists());

    let stopped = supervisor.stop("pkgv-sleeper", "1.0").expect("stop failed");
    assert!(matches!(stopped.outcome, StopOutcome::Stopped { forced: true, .. }));
    wait_for(false);
}
