//! # Collaborator Ports
//!
//! Narrow interfaces to everything the strategies touch outside the broker:
//! repositories, raw SQL, the downloader, downstream content processing and
//! the filesystem. Production implementations live in [`crate::services`];
//! tests supply recording doubles.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PipelineResult;

/// Filings index rows and their processed flag
#[async_trait]
pub trait DocumentIndexRepository: Send + Sync + 'static {
    /// `processed = false` marks the row "processing"
    async fn update_status(&self, id: i64, processed: bool) -> PipelineResult<()>;
}

/// Document-list table maintenance
#[async_trait]
pub trait DocumentListRepository: Send + Sync + 'static {
    /// Execute a statement batch (the content of a statements file)
    async fn execute_sql(&self, statements: &str) -> PipelineResult<()>;

    /// Upsert rows tagged with the originating path. `is_new` selects
    /// insert-only semantics; otherwise existing rows are replaced.
    async fn insert_or_update(
        &self,
        rows: Vec<Value>,
        tag_path: &str,
        is_new: bool,
    ) -> PipelineResult<u64>;
}

/// Raw statement execution against the database
#[async_trait]
pub trait SqlExecutor: Send + Sync + 'static {
    /// Run a SELECT and return its rows as JSON objects
    async fn query(&self, sql: &str) -> PipelineResult<Vec<Value>>;

    /// Run statements for their side effects; returns rows affected
    async fn execute(&self, sql: &str) -> PipelineResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadProtocol {
    Http,
    File,
}

/// A fetched artifact on local disk
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedDocument {
    pub path: PathBuf,
    pub source_url: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait DocumentDownloader: Send + Sync + 'static {
    /// `None` signals a non-fatal fetch failure
    async fn download(&self, url: &str, protocol: DownloadProtocol) -> Option<DownloadedDocument>;
}

/// Downstream ingestion of a downloaded artifact
#[async_trait]
pub trait ContentProcessor: Send + Sync + 'static {
    /// Idempotent per partition key; returns rows ingested
    async fn process(
        &self,
        document: &DownloadedDocument,
        partition_key: &str,
        is_new: bool,
    ) -> PipelineResult<u64>;
}

#[async_trait]
pub trait FileStore: Send + Sync + 'static {
    async fn read_to_string(&self, path: &str) -> PipelineResult<String>;
    async fn remove(&self, path: &str) -> PipelineResult<()>;
    async fn exists(&self, path: &str) -> bool;
}

/// Everything a strategy may call, shared across concurrent deliveries
#[derive(Clone)]
pub struct Collaborators {
    pub document_index: Arc<dyn DocumentIndexRepository>,
    pub document_list: Arc<dyn DocumentListRepository>,
    pub sql: Arc<dyn SqlExecutor>,
    pub downloader: Arc<dyn DocumentDownloader>,
    pub content: Arc<dyn ContentProcessor>,
    pub files: Arc<dyn FileStore>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
