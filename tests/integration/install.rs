#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{FixtureFetcher, catalog_of, linux, package, tar_gz_bytes, zip_bytes};
use pkgvisor::{
    catalog::ServiceFamily,
    constants::RECEIPT_FILE_NAME,
    error::{ErrorKind, WarningKind},
    installer::{InstallOptions, InstallStatus, Installer},
    process::{CommandSpec, Launcher, ProcessInfo, ProcessTable},
    registry::{InstallRegistry, MetadataStore},
    runtime::RuntimeLayout,
    supervisor::Supervisor,
};
use tempfile::tempdir;

const DEMO_URL: &str = "https://downloads.invalid/demo-1.0.0.zip";

fn demo_zip() -> Vec<u8> {
    zip_bytes(&[
        ("demo-1.0.0/", b""),
        ("demo-1.0.0/bin/demo", b"#!/bin/sh\necho demo\n"),
        ("demo-1.0.0/README", b"demo"),
    ])
}

struct NoLaunch;

impl Launcher for NoLaunch {
    fn run(&self, _command: &CommandSpec) -> std::io::Result<()> {
        panic!("nothing should run");
    }

    fn spawn_detached(&self, _command: &CommandSpec, _log: &std::path::Path) -> std::io::Result<u32> {
        panic!("nothing should spawn");
    }
}

struct EmptyTable;

impl ProcessTable for EmptyTable {
    fn processes(&self) -> Vec<ProcessInfo> {
        Vec::new()
    }

    fn kill(&self, _pid: u32) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn zip_install_records_metadata_and_receipt() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = RuntimeLayout::new(temp.path());
    let catalog = catalog_of(vec![package(
        "demo",
        "addons/demo",
        ServiceFamily::Generic,
        Some("bin/demo"),
        "1.0.0",
        DEMO_URL,
    )]);
    let fetcher = FixtureFetcher::default().with(DEMO_URL, demo_zip());
    let registry = InstallRegistry::new(layout.registry_path());
    let installer = Installer::new(&catalog, &layout, linux(), &fetcher, &registry);

    let progress = installer
        .install("demo", "1.0.0", InstallOptions::default(), &mut |_| {})
        .expect("install failed");

    let install_dir = layout.install_dir("addons/demo", "1.0.0");
    assert_eq!(progress.status, InstallStatus::Complete);
    assert_eq!(progress.install_path.as_deref(), Some(install_dir.as_path()));
    assert!(install_dir.join("bin/demo").is_file());
    assert!(install_dir.join(RECEIPT_FILE_NAME).is_file());

    let record = registry.get("demo", "1.0.0").unwrap().expect("registry row");
    assert_eq!(record.install_path, install_dir);

    let installed = installer.installed();
    assert_eq!(installed.len(), 1);
    assert!(installed[0].complete);
    assert!(installed[0].recorded);
}

#[test]
fn second_install_is_a_noop_unless_forced() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = RuntimeLayout::new(temp.path());
    let catalog = catalog_of(vec![package(
        "demo",
        "addons/demo",
        ServiceFamily::Generic,
        Some("bin/demo"),
        "1.0.0",
        DEMO_URL,
    )]);
    let fetcher = FixtureFetcher::default().with(DEMO_URL, demo_zip());
    let registry = InstallRegistry::new(layout.registry_path());
    let installer = Installer::new(&catalog, &layout, linux(), &fetcher, &registry);

    installer
        .install("demo", "1.0.0", InstallOptions::default(), &mut |_| {})
        .unwrap();
    let stray = layout.install_dir("addons/demo", "1.0.0").join("stray.txt");
    fs::write(&stray, "left behind").unwrap();

    let again = installer
        .install("demo", "1.0.0", InstallOptions::default(), &mut |_| {})
        .unwrap();
    assert_eq!(again.status, InstallStatus::Complete);
    assert_eq!(again.warnings[0].kind, WarningKind::AlreadyInstalled);
    assert_eq!(fetcher.request_count(), 1);
    assert!(stray.exists());

    installer
        .install("demo", "1.0.0", InstallOptions { force: true }, &mut |_| {})
        .unwrap();
    assert_eq!(fetcher.request_count(), 2);
    assert!(!stray.exists());
}

#[test]
fn interrupted_install_is_replaced_not_merged() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = RuntimeLayout::new(temp.path());
    let url = "https://downloads.invalid/tool-2.0.tar.gz";
    let catalog = catalog_of(vec![package(
        "tool",
        "addons/tool",
        ServiceFamily::Tool,
        None,
        "2.0",
        url,
    )]);
    let fetcher = FixtureFetcher::default().with(url, tar_gz_bytes(&[("tool-2.0/run.sh", b"echo")]));
    let registry = InstallRegistry::new(layout.registry_path());
    let installer = Installer::new(&catalog, &layout, linux(), &fetcher, &registry);

    let install_dir = layout.install_dir("addons/tool", "2.0");
    fs::create_dir_all(install_dir.join("half")).unwrap();
    fs::write(install_dir.join("half/partial.bin"), "xx").unwrap();
    assert!(!installer.installed()[0].complete);

    installer
        .install("tool", "2.0", InstallOptions::default(), &mut |_| {})
        .unwrap();
    assert!(install_dir.join("run.sh").is_file());
    assert!(!install_dir.join("half").exists());
    assert_eq!(fetcher.request_count(), 1);
}

#[test]
fn failed_download_leaves_no_registry_row() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = RuntimeLayout::new(temp.path());
    let catalog = catalog_of(vec![package(
        "demo",
        "addons/demo",
        ServiceFamily::Generic,
        Some("bin/demo"),
        "1.0.0",
        DEMO_URL,
    )]);
    let fetcher = FixtureFetcher::default();
    let registry = InstallRegistry::new(layout.registry_path());
    let installer = Installer::new(&catalog, &layout, linux(), &fetcher, &registry);

    let mut last = None;
    let failure = installer
        .install("demo", "1.0.0", InstallOptions::default(), &mut |p| {
            last = Some(p.status)
        })
        .unwrap_err();

    assert_eq!(failure.error.kind(), ErrorKind::DownloadFailed);
    assert_eq!(failure.progress.status, InstallStatus::Error);
    assert_eq!(last, Some(InstallStatus::Error));
    assert!(registry.get("demo", "1.0.0").unwrap().is_none());
    assert!(!layout.scratch_dir().join("demo-1.0.0").exists());
}

#[test]
fn uninstall_then_status_reports_not_installed() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = RuntimeLayout::new(temp.path());
    let catalog = catalog_of(vec![package(
        "demo",
        "addons/demo",
        ServiceFamily::Generic,
        Some("bin/demo"),
        "1.0.0",
        DEMO_URL,
    )]);
    let fetcher = FixtureFetcher::default().with(DEMO_URL, demo_zip());
    let registry = InstallRegistry::new(layout.registry_path());
    let installer = Installer::new(&catalog, &layout, linux(), &fetcher, &registry);
    installer
        .install("demo", "1.0.0", InstallOptions::default(), &mut |_| {})
        .unwrap();

    let report = installer.uninstall("demo", "1.0.0").expect("uninstall failed");
    assert!(report.warnings.is_empty());
    assert!(!report.install_path.exists());
    assert!(registry.get("demo", "1.0.0").unwrap().is_none());

    let launcher = NoLaunch;
    let table = EmptyTable;
    let supervisor = Supervisor::new(&catalog, &layout, linux(), &launcher, &table);
    let err = supervisor.status("demo", "1.0.0").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotInstalled);

    let again = installer.uninstall("demo", "1.0.0").unwrap_err();
    assert_eq!(again.kind(), ErrorKind::NotInstalled);
}

#[test]
fn uninstall_without_registry_row_succeeds_quietly() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = RuntimeLayout::new(temp.path());
    let catalog = catalog_of(Vec::new());
    let fetcher = FixtureFetcher::default();
    let registry = InstallRegistry::new(layout.registry_path());
    let installer = Installer::new(&catalog, &layout, linux(), &fetcher, &registry);

    fs::create_dir_all(layout.install_dir("database/redis", "7.2.3")).unwrap();
    let report = installer.uninstall("redis", "7.2.3").unwrap();
    assert!(report.warnings.is_empty());
}
