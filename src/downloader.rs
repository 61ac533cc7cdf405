//! HTTP(S) download of the COD archive with progress and cancellation.
//!
//! Failures never propagate: they are reported on the status channel and
//! [`Downloader::download_file`] returns `None`.

use crate::events::{ensure_not_cancelled, Reporter};
use crate::{InstallerError, Result};
use futures_util::StreamExt;
use log::{debug, error, info};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        // No overall timeout: the archive is several gigabytes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Non-blank absolute URL with an http or https scheme.
    pub fn is_valid_url(url: &str, reporter: &Reporter) -> bool {
        if url.trim().is_empty() {
            reporter.status("URL must not be empty.");
            return false;
        }
        match Url::parse(url.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => true,
            _ => {
                reporter.status("Invalid URL. Please enter a valid address.");
                false
            }
        }
    }

    /// Header-only probe; only `200 OK` counts as available.
    pub async fn check_url_availability(&self, url: &str, reporter: &Reporter) -> bool {
        match self.client.head(url.trim()).send().await {
            Ok(response) => {
                debug!("HEAD {} -> {}", url, response.status());
                response.status() == StatusCode::OK
            }
            Err(e) => {
                reporter.status(format!("Error checking URL: {}", e));
                false
            }
        }
    }

    /// Stream `url` into `folder`; `None` means cancelled or failed.
    pub async fn download_file(
        &self,
        url: &str,
        folder: Option<&Path>,
        token: &CancellationToken,
        reporter: &Reporter,
    ) -> Option<PathBuf> {
        let folder = match folder.filter(|f| !f.as_os_str().is_empty()) {
            Some(folder) => folder,
            None => {
                reporter.status("Download cancelled by user.");
                return None;
            }
        };

        let file_name = match file_name_from_url(url) {
            Some(name) => name,
            None => {
                reporter.status(format!("Error downloading file: no file name in {}", url));
                return None;
            }
        };
        let destination = folder.join(file_name);

        match self.stream_to_file(url.trim(), &destination, token, reporter).await {
            Ok(bytes) => {
                info!("Downloaded {} bytes to {:?}", bytes, destination);
                reporter.status("Download completed.");
                Some(destination)
            }
            Err(InstallerError::Cancelled) => {
                // Partial file is useless to the extractor.
                let _ = tokio::fs::remove_file(&destination).await;
                reporter.status("Download cancelled by user.");
                reporter.cancelled();
                None
            }
            Err(e) => {
                error!("Download of {} failed: {}", url, e);
                reporter.status(format!("Error downloading file: {}", e));
                None
            }
        }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        destination: &Path,
        token: &CancellationToken,
        reporter: &Reporter,
    ) -> Result<u64> {
        ensure_not_cancelled(token)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = tokio::select! {
            _ = token.cancelled() => return Err(InstallerError::Cancelled),
            response = self.client.get(url).send() => response?,
        };
        if !response.status().is_success() {
            return Err(InstallerError::download(format!("HTTP {}", response.status())));
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut received = 0u64;
        let mut last_percent = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(InstallerError::Cancelled),
                next = stream.next() => {
                    let chunk = match next {
                        Some(chunk) => chunk?,
                        None => break,
                    };
                    file.write_all(&chunk).await?;
                    received += chunk.len() as u64;

                    if let Some(total) = total {
                        let percent = (received.min(total) * 100 / total) as u8;
                        if last_percent != Some(percent) {
                            reporter.progress(percent);
                            last_percent = Some(percent);
                        }
                    }
                }
            }
        }

        file.flush().await?;
        Ok(received)
    }
}

/// Last non-empty path segment of `url`.
pub fn file_name_from_url(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back())
                .map(|s| s.to_string())
        })
        .filter(|name| !name.is_empty())
}
