//! Fetches resolved links to disk
//!
//! [HttpFetcher] streams the response body into `<dest>.part`, moves it into
//! place once complete and stores the request attributes next to the file
//! as `<dest>.json`.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::{Client, Response};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::slider::playlist::Attributes;

/// Error types for the fetcher
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Download error: {0}")]
    Download(String),
}

/// Result type for download operations
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Callback for problems that should be reported without failing the fetch.
pub type ErrorCallback<'a> = &'a (dyn Fn(String) + Send + Sync);

/// Writes the file behind `url` to `dest` and attaches `attributes`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        attributes: &Attributes,
        on_error: ErrorCallback<'_>,
    ) -> DownloadResult<()>;
}

/// HTTP client settings for [HttpFetcher].
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("slider_downloader/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Plain HTTP GET fetcher. One attempt per file.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpFetcherConfig) -> DownloadResult<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }

    /// Path of the in-progress download for `dest`.
    pub fn part_path(dest: &Path) -> PathBuf {
        with_appended_extension(dest, "part")
    }

    /// Path of the attribute sidecar for `dest`.
    pub fn sidecar_path(dest: &Path) -> PathBuf {
        with_appended_extension(dest, "json")
    }

    /// Stream a response to a file
    async fn stream_to_file(response: Response, file_path: &Path) -> DownloadResult<u64> {
        let mut file = File::create(file_path).await?;
        let mut stream = response.bytes_stream();
        let mut bytes_written = 0u64;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result
                .map_err(|e| DownloadError::Download(format!("Failed to get chunk: {}", e)))?;
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }

        // Ensure all data is written to disk
        file.flush().await?;
        Ok(bytes_written)
    }

    async fn write_sidecar(dest: &Path, attributes: &Attributes) -> DownloadResult<PathBuf> {
        let sidecar = Self::sidecar_path(dest);
        let json = serde_json::to_vec_pretty(attributes)
            .map_err(|e| DownloadError::Download(format!("Failed to encode attributes: {}", e)))?;
        fs::write(&sidecar, json).await?;
        Ok(sidecar)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, dest, attributes, on_error), fields(dest = %dest.display()))]
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        attributes: &Attributes,
        on_error: ErrorCallback<'_>,
    ) -> DownloadResult<()> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!("HTTP error: {}", status);
            return Err(DownloadError::InvalidResponse(format!("HTTP {}", status)));
        }

        let part_path = Self::part_path(dest);
        match Self::stream_to_file(response, &part_path).await {
            Ok(bytes) => {
                fs::rename(&part_path, dest).await?;
                info!("Downloaded {} bytes to {}", bytes, dest.display());
            }
            Err(e) => {
                warn!("Download error: {}", e);
                if let Err(cleanup) = fs::remove_file(&part_path).await {
                    debug!("Could not remove {}: {}", part_path.display(), cleanup);
                }
                return Err(e);
            }
        }

        if !attributes.is_empty() {
            match Self::write_sidecar(dest, attributes).await {
                Ok(sidecar) => debug!("Wrote attributes to {}", sidecar.display()),
                Err(e) => on_error(format!("could not write attributes: {}", e)),
            }
        }

        Ok(())
    }
}

fn with_appended_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}
