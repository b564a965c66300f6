//! SQL select-and-upsert into the document list.

use std::sync::Arc;

use tracing::debug;

use super::ports::Collaborators;
use super::{report_chunk_progress, required_path};
use crate::error::{PipelineError, PipelineResult};
use crate::messaging::ack::AckHandle;
use crate::messaging::envelope::FileReference;
use crate::progress::ProgressTracker;

/// Statement file location: the first whitespace-delimited token of `path`.
/// Trailing tokens are ignored.
pub fn statement_path(raw_path: &str) -> PipelineResult<&str> {
    raw_path
        .split_whitespace()
        .next()
        .ok_or_else(|| PipelineError::invalid_payload("file reference path is blank"))
}

#[derive(Debug)]
pub struct SelectAndUpsert<'a> {
    collaborators: &'a Collaborators,
    progress: &'a Arc<ProgressTracker>,
}

impl<'a> SelectAndUpsert<'a> {
    pub fn new(collaborators: &'a Collaborators, progress: &'a Arc<ProgressTracker>) -> Self {
        Self {
            collaborators,
            progress,
        }
    }

    /// Read and delete the statement file, run it, and upsert the rows tagged
    /// with the untouched `path` string.
    pub async fn run(
        &self,
        file: &FileReference,
        is_new: bool,
        ack: &AckHandle,
    ) -> PipelineResult<()> {
        ack.ack_once().await;

        let c = self.collaborators;
        let raw_path = required_path(file)?;
        let path = statement_path(raw_path)?;

        let statement = c.files.read_to_string(path).await?;
        c.files.remove(path).await?;

        let rows = c.sql.query(&statement).await?;
        let row_count = rows.len();
        let written = c
            .document_list
            .insert_or_update(rows, raw_path, is_new)
            .await?;

        debug!(
            path = %path,
            rows = row_count,
            written = written,
            is_new = is_new,
            "Document list upserted"
        );
        report_chunk_progress(self.progress, file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_path_takes_first_token() {
        assert_eq!(
            statement_path("/tmp/file.sql extra-token").unwrap(),
            "/tmp/file.sql"
        );
        assert_eq!(statement_path("  /tmp/a.sql\t2021").unwrap(), "/tmp/a.sql");
        assert_eq!(statement_path("/tmp/b.sql").unwrap(), "/tmp/b.sql");
    }

    #[test]
    fn test_blank_path_is_invalid() {
        assert!(matches!(
            statement_path("   "),
            Err(PipelineError::InvalidPayload { .. })
        ));
    }
}
