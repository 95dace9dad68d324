#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{TarItem, tar_gz_bytes, tar_gz_items, tar_xz_bytes, zip_bytes};
use pkgvisor::{archive::extract, error::ErrorKind};
use tempfile::tempdir;

#[test]
fn zip_with_single_root_is_flattened() {
    let temp = tempdir().expect("failed to create tempdir");
    let archive = temp.path().join("mysql-8.0.35-winx64.zip");
    fs::write(
        &archive,
        zip_bytes(&[
            ("mysql-8.0.35-winx64/", b""),
            ("mysql-8.0.35-winx64/bin/", b""),
            ("mysql-8.0.35-winx64/bin/mysqld.exe", b"MZ"),
            ("mysql-8.0.35-winx64/share/errmsg.sys", b"msgs"),
        ]),
    )
    .unwrap();

    let dest = temp.path().join("database/mysql/8.0.35");
    extract(&archive, &dest).expect("extraction failed");

    assert_eq!(fs::read(dest.join("bin/mysqld.exe")).unwrap(), b"MZ");
    assert!(dest.join("share/errmsg.sys").is_file());
    assert!(!dest.join("mysql-8.0.35-winx64").exists());
}

#[test]
fn tarball_with_several_roots_keeps_layout() {
    let temp = tempdir().expect("failed to create tempdir");
    let archive = temp.path().join("bundle.tar.gz");
    fs::write(
        &archive,
        tar_gz_bytes(&[
            ("bin/node", b"#!/bin/sh\n"),
            ("lib/node_modules/npm/package.json", b"{}"),
            ("README.md", b"readme"),
        ]),
    )
    .unwrap();

    let dest = temp.path().join("runtime/nodejs/20.10.0");
    extract(&archive, &dest).expect("extraction failed");

    assert!(dest.join("bin/node").is_file());
    assert!(dest.join("lib/node_modules/npm/package.json").is_file());
    assert_eq!(fs::read_to_string(dest.join("README.md")).unwrap(), "readme");
}

#[cfg(unix)]
#[test]
fn tarball_preserves_executable_bits() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempdir().expect("failed to create tempdir");
    let archive = temp.path().join("nginx-1.25.3.tar.gz");
    fs::write(
        &archive,
        tar_gz_bytes(&[("nginx-1.25.3/sbin/nginx", b"\x7fELF")]),
    )
    .unwrap();

    let dest = temp.path().join("out");
    extract(&archive, &dest).expect("extraction failed");

    let mode = fs::metadata(dest.join("sbin/nginx")).unwrap().permissions().mode();
    assert_ne!(mode & 0o111, 0);
}

#[test]
fn xz_tarball_with_single_root_is_flattened() {
    let temp = tempdir().expect("failed to create tempdir");
    let entries: &[(&str, &[u8])] = &[
        ("node-v20.10.0-linux-x64/bin/node", b"\x7fELF"),
        ("node-v20.10.0-linux-x64/include/node/node.h", b"#pragma once"),
    ];

    for name in ["node-v20.10.0-linux-x64.tar.xz", "node-v20.10.0-linux-x64.txz"] {
        let archive = temp.path().join(name);
        fs::write(&archive, tar_xz_bytes(entries)).unwrap();

        let dest = temp.path().join(name).with_extension("out");
        extract(&archive, &dest).expect("extraction failed");

        assert_eq!(fs::read(dest.join("bin/node")).unwrap(), b"\x7fELF");
        assert!(dest.join("include/node/node.h").is_file());
        assert!(!dest.join("node-v20.10.0-linux-x64").exists());
    }
}

#[cfg(unix)]
#[test]
fn symlink_out_of_destination_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");
    let outside = temp.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    let outside_target = outside.to_string_lossy().into_owned();

    let cases = [
        ("absolute.tar.gz", outside_target.as_str()),
        ("relative.tar.gz", "../../outside"),
    ];
    for (name, link_target) in cases {
        let archive = temp.path().join(name);
        fs::write(
            &archive,
            tar_gz_items(&[
                TarItem::File("pkg-1.0/bin/tool", b"#!/bin/sh\n"),
                TarItem::Link("pkg-1.0/lib", link_target),
                TarItem::File("pkg-1.0/lib/evil.txt", b"pwned"),
            ]),
        )
        .unwrap();

        let dest = temp.path().join("install").join(name);
        let err = extract(&archive, &dest).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
        assert!(!outside.join("evil.txt").exists());
        assert!(fs::symlink_metadata(dest.join("lib")).is_err());
    }
}

#[cfg(unix)]
#[test]
fn symlinks_inside_destination_are_kept() {
    let temp = tempdir().expect("failed to create tempdir");
    let archive = temp.path().join("node-v20.10.0-linux-x64.tar.gz");
    fs::write(
        &archive,
        tar_gz_items(&[
            TarItem::File("node-v20.10.0-linux-x64/bin/node", b"\x7fELF"),
            TarItem::File(
                "node-v20.10.0-linux-x64/lib/node_modules/npm/bin/npm-cli.js",
                b"cli",
            ),
            TarItem::Link(
                "node-v20.10.0-linux-x64/bin/npm",
                "../lib/node_modules/npm/bin/npm-cli.js",
            ),
        ]),
    )
    .unwrap();

    let dest = temp.path().join("runtime/nodejs/20.10.0");
    extract(&archive, &dest).expect("extraction failed");

    let npm = dest.join("bin/npm");
    assert!(fs::symlink_metadata(&npm).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_to_string(&npm).unwrap(), "cli");
}

#[test]
fn zip_slip_entry_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");
    let archive = temp.path().join("evil.zip");
    fs::write(&archive, zip_bytes(&[("../../outside.txt", b"x")])).unwrap();

    let dest = temp.path().join("nested/dest");
    let err = extract(&archive, &dest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    assert!(!temp.path().join("outside.txt").exists());
}

#[test]
fn corrupt_zip_is_an_extraction_failure() {
    let temp = tempdir().expect("failed to create tempdir");
    let archive = temp.path().join("broken.zip");
    fs::write(&archive, b"definitely not a zip").unwrap();

    let err = extract(&archive, &temp.path().join("dest")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
}

#[test]
fn unknown_suffix_is_unsupported() {
    let temp = tempdir().expect("failed to create tempdir");
    let archive = temp.path().join("bundle.rar");
    fs::write(&archive, b"Rar!").unwrap();

    let dest = temp.path().join("dest");
    let err = extract(&archive, &dest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert!(!dest.exists());
}
