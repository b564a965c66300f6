//! Recording test doubles for the collaborator ports.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use filings_pipeline::error::{PipelineError, PipelineResult};
use filings_pipeline::messaging::InMemoryBroker;
use filings_pipeline::pipeline::{
    Collaborators, ContentProcessor, DocumentDownloader, DocumentIndexRepository,
    DocumentListRepository, DownloadProtocol, DownloadedDocument, FileStore, SqlExecutor,
};

/// Records how many deliveries were still unacknowledged each time a double
/// was called, once pointed at a broker
#[derive(Default)]
pub struct UnackedWatch {
    broker: Mutex<Option<InMemoryBroker>>,
    seen: Mutex<Vec<usize>>,
}

impl UnackedWatch {
    pub fn watch(&self, broker: &InMemoryBroker) {
        *self.broker.lock() = Some(broker.clone());
    }

    fn record(&self) {
        if let Some(broker) = self.broker.lock().as_ref() {
            self.seen.lock().push(broker.unacked_len());
        }
    }

    pub fn seen(&self) -> Vec<usize> {
        self.seen.lock().clone()
    }
}

#[derive(Default)]
pub struct RecordingIndexRepository {
    pub updates: Mutex<Vec<(i64, bool)>>,
}

impl RecordingIndexRepository {
    pub fn statuses_for(&self, id: i64) -> Vec<bool> {
        self.updates
            .lock()
            .iter()
            .filter(|(updated, _)| *updated == id)
            .map(|(_, processed)| *processed)
            .collect()
    }
}

#[async_trait]
impl DocumentIndexRepository for RecordingIndexRepository {
    async fn update_status(&self, id: i64, processed: bool) -> PipelineResult<()> {
        self.updates.lock().push((id, processed));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub rows: Vec<Value>,
    pub tag_path: String,
    pub is_new: bool,
}

#[derive(Default)]
pub struct RecordingListRepository {
    pub executed: Mutex<Vec<String>>,
    pub upserts: Mutex<Vec<Upsert>>,
    pub fail_execute: bool,
}

#[async_trait]
impl DocumentListRepository for RecordingListRepository {
    async fn execute_sql(&self, statements: &str) -> PipelineResult<()> {
        if self.fail_execute {
            return Err(PipelineError::persistence("execute_sql", "deadlock detected"));
        }
        self.executed.lock().push(statements.to_string());
        Ok(())
    }

    async fn insert_or_update(
        &self,
        rows: Vec<Value>,
        tag_path: &str,
        is_new: bool,
    ) -> PipelineResult<u64> {
        let count = rows.len() as u64;
        self.upserts.lock().push(Upsert {
            rows,
            tag_path: tag_path.to_string(),
            is_new,
        });
        Ok(count)
    }
}

#[derive(Default)]
pub struct RecordingSql {
    pub rows: Vec<Value>,
    pub queries: Mutex<Vec<String>>,
    pub executed: Mutex<Vec<String>>,
    pub panic_on_query: bool,
}

#[async_trait]
impl SqlExecutor for RecordingSql {
    async fn query(&self, sql: &str) -> PipelineResult<Vec<Value>> {
        if self.panic_on_query {
            panic!("query executor exploded");
        }
        self.queries.lock().push(sql.to_string());
        Ok(self.rows.clone())
    }

    async fn execute(&self, sql: &str) -> PipelineResult<u64> {
        self.executed.lock().push(sql.to_string());
        Ok(1)
    }
}

#[derive(Default)]
pub struct StubDownloader {
    pub result: Option<DownloadedDocument>,
    pub latency: Option<Duration>,
    pub calls: Mutex<Vec<(String, DownloadProtocol)>>,
    pub unacked: UnackedWatch,
    /// Index status updates already made when each download started
    pub index_updates_seen: Mutex<Vec<Vec<(i64, bool)>>>,
    pub index: Mutex<Option<Arc<RecordingIndexRepository>>>,
}

impl StubDownloader {
    pub fn succeeding() -> Self {
        Self {
            result: Some(DownloadedDocument {
                path: PathBuf::from("/tmp/filings/company.idx"),
                source_url: "https://example.test/company.idx".to_string(),
                size_bytes: 128,
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl DocumentDownloader for StubDownloader {
    async fn download(&self, url: &str, protocol: DownloadProtocol) -> Option<DownloadedDocument> {
        self.calls.lock().push((url.to_string(), protocol));
        self.unacked.record();
        if let Some(index) = self.index.lock().as_ref() {
            let updates = index.updates.lock().clone();
            self.index_updates_seen.lock().push(updates);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.result.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCall {
    pub document: DownloadedDocument,
    pub partition_key: String,
    pub is_new: bool,
}

#[derive(Default)]
pub struct RecordingContent {
    pub calls: Mutex<Vec<ProcessCall>>,
    pub unacked: UnackedWatch,
}

#[async_trait]
impl ContentProcessor for RecordingContent {
    async fn process(
        &self,
        document: &DownloadedDocument,
        partition_key: &str,
        is_new: bool,
    ) -> PipelineResult<u64> {
        self.unacked.record();
        self.calls.lock().push(ProcessCall {
            document: document.clone(),
            partition_key: partition_key.to_string(),
            is_new,
        });
        Ok(1)
    }
}

/// Files held in memory, with every read and remove recorded
#[derive(Default)]
pub struct MemoryFileStore {
    pub files: Mutex<HashMap<String, String>>,
    pub reads: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub unacked: UnackedWatch,
}

impl MemoryFileStore {
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .lock()
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn read_to_string(&self, path: &str) -> PipelineResult<String> {
        self.reads.lock().push(path.to_string());
        self.unacked.record();
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| PipelineError::file_access(path, "No such file or directory"))
    }

    async fn remove(&self, path: &str) -> PipelineResult<()> {
        self.removed.lock().push(path.to_string());
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| PipelineError::file_access(path, "No such file or directory"))
    }

    async fn exists(&self, path: &str) -> bool {
        self.contains(path)
    }
}

/// Collaborators plus typed handles on each double for assertions
pub struct Harness {
    pub index: Arc<RecordingIndexRepository>,
    pub list: Arc<RecordingListRepository>,
    pub sql: Arc<RecordingSql>,
    pub downloader: Arc<StubDownloader>,
    pub content: Arc<RecordingContent>,
    pub files: Arc<MemoryFileStore>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            index: Arc::new(RecordingIndexRepository::default()),
            list: Arc::new(RecordingListRepository::default()),
            sql: Arc::new(RecordingSql::default()),
            downloader: Arc::new(StubDownloader::default()),
            content: Arc::new(RecordingContent::default()),
            files: Arc::new(MemoryFileStore::default()),
        }
    }
}

impl Harness {
    pub fn with_downloader(mut self, downloader: StubDownloader) -> Self {
        self.downloader = Arc::new(downloader);
        self
    }

    pub fn with_files(mut self, files: MemoryFileStore) -> Self {
        self.files = Arc::new(files);
        self
    }

    pub fn with_sql(mut self, sql: RecordingSql) -> Self {
        self.sql = Arc::new(sql);
        self
    }

    pub fn with_list(mut self, list: RecordingListRepository) -> Self {
        self.list = Arc::new(list);
        self
    }

    /// Point every I/O double at `broker` so tests can see when the
    /// delivery was acknowledged relative to each call
    pub fn watch_acks(&self, broker: &InMemoryBroker) {
        self.downloader.unacked.watch(broker);
        *self.downloader.index.lock() = Some(Arc::clone(&self.index));
        self.content.unacked.watch(broker);
        self.files.unacked.watch(broker);
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            document_index: self.index.clone(),
            document_list: self.list.clone(),
            sql: self.sql.clone(),
            downloader: self.downloader.clone(),
            content: self.content.clone(),
            files: self.files.clone(),
        }
    }
}
