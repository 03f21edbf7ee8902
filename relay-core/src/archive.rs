//! Default archive fetcher: HTTP download followed by zip extraction.

use crate::error::ExtractionError;
use crate::extraction::ArchiveFetcher;
use async_trait::async_trait;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Largest archive the fetcher will buffer.
pub const DEFAULT_MAX_ARCHIVE_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HttpArchiveFetcher {
    client: reqwest::Client,
    max_archive_bytes: usize,
}

impl HttpArchiveFetcher {
    pub fn new() -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ExtractionError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Fetch(format!("{} returned {}", url, status)));
        }

        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if data.len() + chunk.len() > self.max_archive_bytes {
                return Err(ExtractionError::Fetch(format!(
                    "archive larger than {} bytes",
                    self.max_archive_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }
        debug!("Downloaded {} bytes from {}", data.len(), url);
        Ok(data)
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch_and_extract(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<(), ExtractionError> {
        let data = self.download(url).await?;
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || unpack_zip(Cursor::new(data), &destination))
            .await
            .map_err(|e| ExtractionError::Unpack(format!("extraction task failed: {}", e)))?
            .map(|written| debug!("Unpacked {} entries", written))
    }
}

/// Unpack a zip archive under `destination`, creating it if needed.
///
/// Entries whose names would land outside `destination` abort the whole
/// extraction. Returns the number of entries written.
pub fn unpack_zip<R: Read + Seek>(reader: R, destination: &Path) -> Result<usize, ExtractionError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    std::fs::create_dir_all(destination)?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative: PathBuf = entry.enclosed_name().ok_or_else(|| {
            ExtractionError::Unpack(format!("entry {:?} escapes the destination", entry.name()))
        })?;
        let target = destination.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::File::create(&target)?;
            std::io::copy(&mut entry, &mut file)?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
            }
        }
        written += 1;
    }
    Ok(written)
}
