//! # Document Downloader
//!
//! Fetches filings index artifacts into the download directory. Every failure
//! (bad status, network error, unwritable directory) is logged and reported
//! as `None`, which the document-index strategy treats as a non-fatal miss.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::ports::{DocumentDownloader, DownloadProtocol, DownloadedDocument};

#[derive(Debug, Clone)]
pub struct HttpDocumentDownloader {
    client: Client,
    download_dir: PathBuf,
}

impl HttpDocumentDownloader {
    pub fn new(download_dir: impl Into<PathBuf>, timeout: Duration) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("filings-pipeline/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                PipelineError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            download_dir: download_dir.into(),
        })
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Unique target path keeping the source's file name for readability
    fn target_path(&self, url: &str) -> PathBuf {
        let base = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("document");
        self.download_dir.join(format!("{}-{base}", Uuid::new_v4()))
    }

    async fn fetch_http(&self, url: &str) -> PipelineResult<DownloadedDocument> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::file_access(url, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::file_access(url, format!("HTTP status {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::file_access(url, format!("body read failed: {e}")))?;

        let path = self.target_path(url);
        self.write(&path, &bytes).await?;

        Ok(DownloadedDocument {
            path,
            source_url: url.to_string(),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn fetch_file(&self, url: &str) -> PipelineResult<DownloadedDocument> {
        let source = url.strip_prefix("file://").unwrap_or(url);
        let path = self.target_path(source);

        self.ensure_dir().await?;
        let size_bytes = tokio::fs::copy(source, &path)
            .await
            .map_err(|e| PipelineError::file_access(source, e.to_string()))?;

        Ok(DownloadedDocument {
            path,
            source_url: url.to_string(),
            size_bytes,
        })
    }

    async fn ensure_dir(&self) -> PipelineResult<()> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| PipelineError::file_access(self.download_dir.display().to_string(), e.to_string()))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> PipelineResult<()> {
        self.ensure_dir().await?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| PipelineError::file_access(path.display().to_string(), e.to_string()))
    }
}

#[async_trait]
impl DocumentDownloader for HttpDocumentDownloader {
    async fn download(&self, url: &str, protocol: DownloadProtocol) -> Option<DownloadedDocument> {
        let result = match protocol {
            DownloadProtocol::Http => self.fetch_http(url).await,
            DownloadProtocol::File => self.fetch_file(url).await,
        };

        match result {
            Ok(document) => {
                debug!(
                    url = %url,
                    path = %document.path.display(),
                    size_bytes = document.size_bytes,
                    "📥 Document downloaded"
                );
                Some(document)
            }
            Err(e) => {
                warn!(url = %url, protocol = ?protocol, error = %e, "Document download failed");
                None
            }
        }
    }
}
