//! Archive detection and extraction with wrapper-directory stripping.
//!
//! Most bundles wrap their content in a `name-version/` folder, some do not.
//! The extractor inspects every entry first: when all entries share one
//! top-level directory (and no file sits directly at the top level) that
//! directory is removed from every output path, otherwise entries are
//! written as-is.
//!
//! Entry names and symlink targets must stay inside the destination. Entries
//! are never written through a symlink already present there.
use flate2::read::GzDecoder;
use std::{
    fs::{self, File},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};
use tar::EntryType;
use tracing::{debug, info};
use xz2::read::XzDecoder;
use zip::ZipArchive;

use crate::error::VisorError;

/// Supported download formats, chosen by file name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.zip`
    Zip,
    /// `.tar.gz`, `.tgz`
    TarGz,
    /// `.tar.xz`, `.txz`
    TarXz,
    /// A bare script or executable copied verbatim (`.phar`, `.php`, `.jar`).
    SingleFile,
}

impl ArchiveFormat {
    /// Detects the format from the file name suffix (case-insensitive).
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".phar") || name.ends_with(".php") || name.ends_with(".jar") {
            Some(Self::SingleFile)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
            Self::TarXz => "tar.xz",
            Self::SingleFile => "file",
        }
    }
}

/// Extracts `archive` into `dest`, creating `dest` if needed.
///
/// Not atomic: on failure `dest` may be partially populated.
pub fn extract(archive: &Path, dest: &Path) -> Result<(), VisorError> {
    let format = ArchiveFormat::detect(archive).ok_or_else(|| VisorError::UnsupportedFormat {
        path: archive.to_path_buf(),
    })?;

    info!(
        "Extracting {} ({}) into {}",
        archive.display(),
        format.as_str(),
        dest.display()
    );

    fs::create_dir_all(dest).map_err(|source| extraction_failed(archive, source))?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest),
        ArchiveFormat::TarGz | ArchiveFormat::TarXz => extract_tar(archive, dest, format),
        ArchiveFormat::SingleFile => copy_single_file(archive, dest),
    }
}

fn extraction_failed(archive: &Path, source: io::Error) -> VisorError {
    VisorError::ExtractionFailed {
        archive: archive.to_path_buf(),
        source,
    }
}

/// Splits an entry name into normalized relative components.
///
/// `./` and empty segments are dropped; parent references, absolute paths and
/// drive prefixes are rejected.
fn entry_components(archive: &Path, name: &str) -> Result<Vec<String>, VisorError> {
    let unsafe_entry = || VisorError::UnsafeEntry {
        archive: archive.to_path_buf(),
        entry: name.to_string(),
    };

    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(unsafe_entry());
    }

    let mut parts = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(unsafe_entry()),
            p if p.contains(':') => return Err(unsafe_entry()),
            p => parts.push(p.to_string()),
        }
    }
    Ok(parts)
}

/// Whether a symlink stored at `relative` with target `link` resolves to a
/// path inside the destination. Only lexical: `..` may climb back up to, but
/// not past, the destination root.
fn link_stays_inside(relative: &Path, link: &str) -> bool {
    let normalized = link.replace('\\', "/");
    if normalized.starts_with('/') || normalized.contains(':') {
        return false;
    }

    let mut depth = relative.components().count().saturating_sub(1);
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." if depth == 0 => return false,
            ".." => depth -= 1,
            _ => depth += 1,
        }
    }
    true
}

/// Whether any directory on the way from `dest` to `relative` (and the path
/// itself when `include_last` is set) is a symlink.
fn passes_through_symlink(dest: &Path, relative: &Path, include_last: bool) -> bool {
    let count = relative.components().count();
    let mut current = dest.to_path_buf();
    for (index, component) in relative.components().enumerate() {
        if index + 1 == count && !include_last {
            break;
        }
        current.push(component);
        if fs::symlink_metadata(&current).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return true;
        }
    }
    false
}

/// Shape of one archive entry used for root detection.
#[derive(Debug, Clone)]
struct EntryShape {
    parts: Vec<String>,
    is_dir: bool,
}

/// Returns the single wrapping directory to strip, if every entry lives under it.
fn wrapping_root(entries: &[EntryShape]) -> Option<String> {
    let mut root: Option<&str> = None;

    for entry in entries {
        let Some(first) = entry.parts.first() else {
            continue;
        };
        if entry.parts.len() == 1 && !entry.is_dir {
            return None;
        }
        match root {
            None => root = Some(first),
            Some(existing) if existing != first => return None,
            Some(_) => {}
        }
    }

    root.map(str::to_string)
}

/// Output path relative to the destination, or `None` when nothing remains
/// (the stripped root itself or a `./` entry).
fn relative_target(parts: &[String], root: Option<&str>) -> Option<PathBuf> {
    let remaining = match root {
        Some(root) if parts.first().map(String::as_str) == Some(root) => &parts[1..],
        _ => parts,
    };
    if remaining.is_empty() {
        return None;
    }
    Some(remaining.iter().collect())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32, is_dir: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if is_dir { (mode & 0o7777) | 0o700 } else { mode & 0o7777 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32, _is_dir: bool) -> io::Result<()> {
    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), VisorError> {
    let zip_failed = |err: zip::result::ZipError| extraction_failed(archive, io::Error::other(err));

    let file = File::open(archive).map_err(|source| extraction_failed(archive, source))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(zip_failed)?;

    let mut shapes = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index_raw(index).map_err(zip_failed)?;
        shapes.push(EntryShape {
            parts: entry_components(archive, entry.name())?,
            is_dir: entry.is_dir(),
        });
    }

    let root = wrapping_root(&shapes);
    if let Some(root) = &root {
        debug!("Stripping wrapping directory '{root}' from {}", archive.display());
    }

    for (index, shape) in shapes.iter().enumerate() {
        let Some(relative) = relative_target(&shape.parts, root.as_deref()) else {
            continue;
        };
        let target = dest.join(relative);
        let mut entry = zip.by_index(index).map_err(zip_failed)?;
        let mode = entry.unix_mode();

        if shape.is_dir {
            fs::create_dir_all(&target).map_err(|source| extraction_failed(archive, source))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|source| extraction_failed(archive, source))?;
            }
            let mut out =
                File::create(&target).map_err(|source| extraction_failed(archive, source))?;
            io::copy(&mut entry, &mut out).map_err(|source| extraction_failed(archive, source))?;
        }

        if let Some(mode) = mode {
            apply_mode(&target, mode, shape.is_dir)
                .map_err(|source| extraction_failed(archive, source))?;
        }
    }

    Ok(())
}

fn open_tar(
    archive: &Path,
    format: ArchiveFormat,
) -> Result<tar::Archive<Box<dyn Read>>, VisorError> {
    let file = File::open(archive).map_err(|source| extraction_failed(archive, source))?;
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(BufReader::new(file))),
        _ => Box::new(GzDecoder::new(BufReader::new(file))),
    };
    Ok(tar::Archive::new(reader))
}

fn is_extractable(entry_type: EntryType) -> bool {
    entry_type.is_file()
        || entry_type.is_dir()
        || entry_type.is_symlink()
        || entry_type.is_hard_link()
}

fn extract_tar(archive: &Path, dest: &Path, format: ArchiveFormat) -> Result<(), VisorError> {
    let failed = |source: io::Error| extraction_failed(archive, source);

    // First pass: collect entry shapes for root detection.
    let mut shapes = Vec::new();
    {
        let mut tar = open_tar(archive, format)?;
        for entry in tar.entries().map_err(failed)? {
            let entry = entry.map_err(failed)?;
            let entry_type = entry.header().entry_type();
            if !is_extractable(entry_type) {
                continue;
            }
            let path = entry.path().map_err(failed)?;
            shapes.push(EntryShape {
                parts: entry_components(archive, &path.to_string_lossy())?,
                is_dir: entry_type.is_dir(),
            });
        }
    }

    let root = wrapping_root(&shapes);
    if let Some(root) = &root {
        debug!("Stripping wrapping directory '{root}' from {}", archive.display());
    }

    let mut tar = open_tar(archive, format)?;
    for entry in tar.entries().map_err(failed)? {
        let mut entry = entry.map_err(failed)?;
        let entry_type = entry.header().entry_type();
        if !is_extractable(entry_type) {
            continue;
        }

        let path = entry.path().map_err(failed)?.to_string_lossy().into_owned();
        let parts = entry_components(archive, &path)?;
        let Some(relative) = relative_target(&parts, root.as_deref()) else {
            continue;
        };
        let unsafe_entry = |name: String| VisorError::UnsafeEntry {
            archive: archive.to_path_buf(),
            entry: name,
        };
        if passes_through_symlink(dest, &relative, entry_type.is_dir()) {
            return Err(unsafe_entry(path));
        }
        if entry_type.is_symlink() {
            let link_name = entry
                .link_name()
                .map_err(failed)?
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !link_stays_inside(&relative, &link_name) {
                return Err(unsafe_entry(format!("{path} -> {link_name}")));
            }
        }

        let target = dest.join(&relative);

        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(failed)?;
            if let Ok(mode) = entry.header().mode() {
                apply_mode(&target, mode, true).map_err(failed)?;
            }
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(failed)?;
        }
        if fs::symlink_metadata(&target).is_ok_and(|meta| !meta.is_dir()) {
            fs::remove_file(&target).map_err(failed)?;
        }

        if entry_type.is_hard_link() {
            let link_name = entry
                .link_name()
                .map_err(failed)?
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let link_parts = entry_components(archive, &link_name)?;
            let Some(link_relative) = relative_target(&link_parts, root.as_deref()) else {
                continue;
            };
            if passes_through_symlink(dest, &link_relative, true) {
                return Err(unsafe_entry(format!("{path} => {link_name}")));
            }
            let source = dest.join(link_relative);
            if fs::hard_link(&source, &target).is_err() {
                fs::copy(&source, &target).map_err(failed)?;
            }
            continue;
        }

        entry.unpack(&target).map_err(failed)?;
    }

    Ok(())
}

fn copy_single_file(archive: &Path, dest: &Path) -> Result<(), VisorError> {
    let file_name = archive
        .file_name()
        .ok_or_else(|| VisorError::UnsupportedFormat {
            path: archive.to_path_buf(),
        })?;
    let target = dest.join(file_name);
    fs::copy(archive, &target).map_err(|source| extraction_failed(archive, source))?;
    debug!("Copied {} to {}", archive.display(), target.display());
    Ok(())
}
