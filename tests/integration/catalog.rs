use std::fs;

use pkgvisor::{
    catalog::{Catalog, Platform, ServiceFamily},
    config::load_settings,
    error::ErrorKind,
};
use tempfile::tempdir;

#[test]
fn builtin_catalog_covers_every_category() {
    let catalog = Catalog::builtin();
    let categories = catalog.categories();
    for expected in ["database", "runtime", "webserver", "tools"] {
        assert!(categories.contains(&expected), "missing {expected}");
    }
    assert_eq!(catalog.by_category("all").len(), catalog.packages().len());
    assert!(
        catalog
            .by_category("database")
            .iter()
            .all(|p| p.category == "database")
    );
}

#[test]
fn version_ids_are_unique_per_package() {
    let catalog = Catalog::builtin();
    for package in catalog.packages() {
        let mut versions: Vec<&str> = package.versions.iter().map(|v| v.version.as_str()).collect();
        let total = versions.len();
        versions.sort();
        versions.dedup();
        assert_eq!(versions.len(), total, "duplicate version in {}", package.id);
    }
}

#[test]
fn resolution_errors_are_distinct() {
    let catalog = Catalog::builtin();
    let linux = Platform::new("linux", "amd64");

    let missing = catalog.resolve("postgres", "16.1", &linux).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::PackageNotFound);

    let bad_version = catalog.resolve("nginx", "0.0.1", &linux).unwrap_err();
    assert_eq!(bad_version.kind(), ErrorKind::VersionNotFound);

    let no_build = catalog
        .resolve("nginx", "1.25.3", &Platform::new("darwin", "arm64"))
        .unwrap_err();
    assert_eq!(no_build.kind(), ErrorKind::NoDownloadForPlatform);
}

#[test]
fn tools_resolve_on_any_platform() {
    let catalog = Catalog::builtin();
    for platform in [
        Platform::new("windows", "amd64"),
        Platform::new("linux", "arm64"),
        Platform::new("darwin", "amd64"),
    ] {
        let resolved = catalog.resolve("adminer", "4.8.1", &platform).unwrap();
        assert_eq!(resolved.key, "all");
        assert_eq!(resolved.file_name(), "adminer-4.8.1.php");
    }
}

#[test]
fn settings_file_adds_catalog_entries() {
    let temp = tempdir().expect("failed to create tempdir");
    fs::write(
        temp.path().join("extra.yaml"),
        r#"
- id: memcached
  name: Memcached
  category: database
  install_subpath: database/memcached
  executable:
    linux: bin/memcached
  ports: [11211]
  versions:
    - version: "1.6.22"
      downloads:
        linux/amd64: https://downloads.invalid/memcached-1.6.22.tar.gz
"#,
    )
    .unwrap();
    let settings_path = temp.path().join("pkgvisor.yaml");
    fs::write(&settings_path, "catalog: extra.yaml\n").unwrap();

    let settings = load_settings(Some(settings_path.to_str().unwrap())).unwrap();
    let catalog = settings.build_catalog().unwrap();

    let memcached = catalog.get("memcached").expect("overlay entry");
    assert_eq!(memcached.family, ServiceFamily::Generic);
    assert_eq!(memcached.primary_port(), Some(11211));
    assert!(catalog.get("mysql").is_some());
}
