//! Streaming downloads with progress reporting.
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::{BufReader, ErrorKind, Read, Write},
    path::Path,
    time::Duration,
};
use tracing::{debug, info};

use crate::{
    config::DownloadSettings,
    constants::DOWNLOAD_CHUNK_SIZE,
    error::VisorError,
};

/// Progress callback: `(bytes_so_far, total_bytes)`; `total_bytes` is `None`
/// when the server omits the content length.
pub type ProgressFn<'a> = dyn FnMut(u64, Option<u64>) + 'a;

/// Fetches a URL into a local file.
pub trait Fetcher {
    /// Streams `url` into a freshly created `dest`, invoking `on_progress`
    /// after each chunk.
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), VisorError>;
}

/// HTTP(S) fetcher backed by a blocking `reqwest` client.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a fetcher. No timeout is configured: a stalled peer blocks the
    /// calling install.
    pub fn new(settings: &DownloadSettings) -> Result<Self, VisorError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| VisorError::io("failed to build HTTP client", std::io::Error::other(err)))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), VisorError> {
        info!("Downloading {url}");
        let failed = |source: std::io::Error| VisorError::DownloadFailed {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| failed(std::io::Error::other(err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VisorError::DownloadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        debug!("Response for {url}: status {status}, length {total:?}");

        let mut out = File::create(dest).map_err(failed)?;
        let written = copy_with_progress(response, &mut out, total, on_progress).map_err(failed)?;
        out.flush().map_err(failed)?;

        info!("Downloaded {written} bytes from {url}");
        Ok(())
    }
}

/// Copies `reader` into `writer` in fixed-size chunks, reporting cumulative
/// progress after every chunk.
pub fn copy_with_progress<R: Read, W: Write>(
    mut reader: R,
    writer: &mut W,
    total: Option<u64>,
    on_progress: &mut ProgressFn<'_>,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; DOWNLOAD_CHUNK_SIZE];
    let mut downloaded: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buf[..n])?;
        downloaded += n as u64;
        on_progress(downloaded, total);
    }

    Ok(downloaded)
}

/// Maps download progress onto the `0..=band` range; `None` when indeterminate.
pub fn scaled_progress(downloaded: u64, total: Option<u64>, band: f64) -> Option<f64> {
    match total {
        Some(total) if total > 0 => {
            let fraction = (downloaded as f64 / total as f64).min(1.0);
            Some(fraction * band)
        }
        _ => None,
    }
}

/// Verifies the sha256 digest of `path` against `expected` (hex, any case).
pub fn verify_sha256(path: &Path, expected: &str, url: &str) -> Result<(), VisorError> {
    let file = File::open(path).map_err(|source| VisorError::DownloadFailed {
        url: url.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DOWNLOAD_CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|source| VisorError::DownloadFailed {
                url: url.to_string(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let actual = format!("{:x}", hasher.finalize());
    if actual.eq_ignore_ascii_case(expected.trim()) {
        debug!("Checksum verified for {url}");
        Ok(())
    } else {
        let _ = fs::remove_file(path);
        Err(VisorError::ChecksumMismatch {
            url: url.to_string(),
            expected: expected.trim().to_string(),
            actual,
        })
    }
}
