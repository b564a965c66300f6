//! SQL select-and-update: run a statement file for its side effects only.

use std::sync::Arc;

use tracing::debug;

use super::ports::Collaborators;
use super::{report_chunk_progress, required_path};
use crate::error::PipelineResult;
use crate::messaging::ack::AckHandle;
use crate::messaging::envelope::FileReference;
use crate::progress::ProgressTracker;

#[derive(Debug)]
pub struct SelectAndUpdate<'a> {
    collaborators: &'a Collaborators,
    progress: &'a Arc<ProgressTracker>,
}

impl<'a> SelectAndUpdate<'a> {
    pub fn new(collaborators: &'a Collaborators, progress: &'a Arc<ProgressTracker>) -> Self {
        Self {
            collaborators,
            progress,
        }
    }

    /// Unlike select-and-upsert, `path` is used verbatim (no token split)
    pub async fn run(&self, file: &FileReference, ack: &AckHandle) -> PipelineResult<()> {
        ack.ack_once().await;

        let c = self.collaborators;
        let path = required_path(file)?;

        let statement = c.files.read_to_string(path).await?;
        c.files.remove(path).await?;

        let affected = c.sql.execute(&statement).await?;

        debug!(path = %path, affected = affected, "Update statement executed");
        report_chunk_progress(self.progress, file);
        Ok(())
    }
}
