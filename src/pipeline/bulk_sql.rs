//! Bulk SQL execution, shared by `DOCUMENT_SQL` and `DOCUMENT_LIST_SQL`.

use std::sync::Arc;

use tracing::debug;

use super::ports::Collaborators;
use super::{report_chunk_progress, required_path};
use crate::error::{PipelineError, PipelineResult};
use crate::messaging::ack::AckHandle;
use crate::messaging::envelope::FileReference;
use crate::progress::ProgressTracker;

#[derive(Debug)]
pub struct BulkSqlExecution<'a> {
    collaborators: &'a Collaborators,
    progress: &'a Arc<ProgressTracker>,
}

impl<'a> BulkSqlExecution<'a> {
    pub fn new(collaborators: &'a Collaborators, progress: &'a Arc<ProgressTracker>) -> Self {
        Self {
            collaborators,
            progress,
        }
    }

    /// Ack first, then run the statements file at `path` as one batch.
    /// The file is left in place.
    pub async fn run(&self, file: &FileReference, ack: &AckHandle) -> PipelineResult<()> {
        ack.ack_once().await;

        let path = required_path(file)?;
        let files = &self.collaborators.files;
        if !files.exists(path).await {
            return Err(PipelineError::file_access(path, "statements file not found"));
        }

        let statements = files.read_to_string(path).await?;
        self.collaborators
            .document_list
            .execute_sql(&statements)
            .await?;

        debug!(path = %path, bytes = statements.len(), "Statement batch executed");
        report_chunk_progress(self.progress, file);
        Ok(())
    }
}
