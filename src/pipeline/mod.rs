//! # Processing Pipeline
//!
//! One strategy per envelope type, each a bounded unit of work over the
//! collaborator ports:
//!
//! | Type                         | Strategy             | Ack point             |
//! |------------------------------|----------------------|-----------------------|
//! | `DOCUMENT_INDEX`             | [`DocumentIndexFetch`] | after download attempt |
//! | `DOCUMENT_SQL`, `DOCUMENT_LIST_SQL` | [`BulkSqlExecution`] | before any I/O |
//! | `DOCUMENT_LIST_SQL_SELECT`   | [`SelectAndUpsert`]  | before any I/O        |
//! | `DOCUMENT_LIST_SQL_UPDATE`   | [`SelectAndUpdate`]  | before any I/O        |
//! | `DOCUMENT_LIST`, `DOCUMENT_COLLECTION` | drained    | by the consumer       |
//!
//! Within one envelope the steps run strictly in order; there is no ordering
//! between envelopes.

pub mod bulk_sql;
pub mod document_index;
pub mod failure_ledger;
pub mod ports;
pub mod router;
pub mod select_update;
pub mod select_upsert;

pub use bulk_sql::BulkSqlExecution;
pub use document_index::DocumentIndexFetch;
pub use failure_ledger::{FailedJob, FailureLedger};
pub use ports::{
    Collaborators, ContentProcessor, DocumentDownloader, DocumentIndexRepository,
    DocumentListRepository, DownloadProtocol, DownloadedDocument, FileStore, SqlExecutor,
};
pub use router::{JobRouter, RouteOutcome};
pub use select_update::SelectAndUpdate;
pub use select_upsert::{statement_path, SelectAndUpsert};

use crate::error::{PipelineError, PipelineResult};
use crate::messaging::envelope::FileReference;
use crate::progress::ProgressTracker;

fn required_path(file: &FileReference) -> PipelineResult<&str> {
    file.path
        .as_deref()
        .ok_or_else(|| PipelineError::invalid_payload("file reference has no path"))
}

/// Chunked processes tag each file with a name and chunk count
fn report_chunk_progress(progress: &ProgressTracker, file: &FileReference) {
    if let Some(name) = file.name.as_deref() {
        let total = u64::from(file.qty.unwrap_or(1).max(1));
        progress.advance(name, total);
    }
}
