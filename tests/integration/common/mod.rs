#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{Cursor, Read, Write},
    net::TcpListener,
    path::Path,
    sync::Mutex,
    thread,
};

use flate2::{Compression, write::GzEncoder};
use pkgvisor::{
    catalog::{Catalog, PackageDescriptor, Platform, ServiceFamily, VersionDescriptor},
    download::{Fetcher, ProgressFn},
    error::VisorError,
};
use xz2::write::XzEncoder;
use zip::{ZipWriter, write::SimpleFileOptions};

pub fn linux() -> Platform {
    Platform::new("linux", "amd64")
}

/// Builds a zip archive in memory. Names ending in `/` become directories.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().unix_permissions(0o755);
    for (name, body) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// One entry of an in-memory tarball.
pub enum TarItem<'a> {
    File(&'a str, &'a [u8]),
    /// Symlink at the first path pointing at the second.
    Link(&'a str, &'a str),
}

fn write_tar<W: Write>(writer: W, items: &[TarItem<'_>]) -> W {
    let mut builder = tar::Builder::new(writer);
    for item in items {
        let mut header = tar::Header::new_gnu();
        match item {
            TarItem::File(name, body) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(body.len() as u64);
                header.set_mode(0o755);
                header.set_cksum();
                builder.append_data(&mut header, *name, *body).unwrap();
            }
            TarItem::Link(name, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder.append_link(&mut header, *name, *target).unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

fn files<'a>(entries: &[(&'a str, &'a [u8])]) -> Vec<TarItem<'a>> {
    entries
        .iter()
        .map(|&(name, body)| TarItem::File(name, body))
        .collect()
}

/// Builds a gzip-compressed tarball in memory.
pub fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    tar_gz_items(&files(entries))
}

/// Builds a gzip-compressed tarball that may contain symlinks.
pub fn tar_gz_items(items: &[TarItem<'_>]) -> Vec<u8> {
    write_tar(GzEncoder::new(Vec::new(), Compression::default()), items)
        .finish()
        .unwrap()
}

/// Builds an xz-compressed tarball in memory.
pub fn tar_xz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    write_tar(XzEncoder::new(Vec::new(), 6), &files(entries))
        .finish()
        .unwrap()
}

/// Serves one HTTP response on a loopback port and returns the URL of
/// `file_name` on it.
pub fn serve_once(file_name: &str, status: u16, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let reason = if status == 200 { "OK" } else { "Not Found" };
        let head = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = stream.write_all(head.as_bytes());
        let _ = stream.write_all(&body);
    });
    format!("http://127.0.0.1:{port}/{file_name}")
}

/// Serves in-memory payloads keyed by URL and records every request.
#[derive(Default)]
pub struct FixtureFetcher {
    payloads: HashMap<String, Vec<u8>>,
    pub requests: Mutex<Vec<String>>,
}

impl FixtureFetcher {
    pub fn with(mut self, url: &str, body: Vec<u8>) -> Self {
        self.payloads.insert(url.to_string(), body);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Fetcher for FixtureFetcher {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), VisorError> {
        self.requests.lock().unwrap().push(url.to_string());
        let body = self
            .payloads
            .get(url)
            .ok_or_else(|| VisorError::DownloadStatus {
                url: url.to_string(),
                status: 404,
            })?;
        fs::write(dest, body).map_err(|source| VisorError::DownloadFailed {
            url: url.to_string(),
            source,
        })?;
        on_progress(body.len() as u64, Some(body.len() as u64));
        Ok(())
    }
}

/// Single-version package downloadable for every platform.
pub fn package(
    id: &str,
    install_subpath: &str,
    family: ServiceFamily,
    executable: Option<&str>,
    version: &str,
    url: &str,
) -> PackageDescriptor {
    let executable = executable
        .map(|path| {
            ["linux", "darwin", "windows"]
                .into_iter()
                .map(|os| (os.to_string(), path.to_string()))
                .collect()
        })
        .unwrap_or_default();
    PackageDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        category: "tools".to_string(),
        install_subpath: install_subpath.to_string(),
        executable,
        config_file: None,
        ports: Vec::new(),
        family,
        versions: vec![VersionDescriptor {
            version: version.to_string(),
            latest: true,
            lts: false,
            downloads: BTreeMap::from([("all".to_string(), url.to_string())]),
            checksums: BTreeMap::new(),
        }],
    }
}

pub fn catalog_of(packages: Vec<PackageDescriptor>) -> Catalog {
    Catalog::builtin().overlay(Catalog::new(packages))
}
