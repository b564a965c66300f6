//! Document-index fetch: mark processing, download, ack, mark processed,
//! hand off to content processing.

use tracing::{debug, warn};

use super::ports::{Collaborators, DownloadProtocol};
use crate::constants::partition_key_for_year;
use crate::error::{PipelineError, PipelineResult};
use crate::messaging::ack::AckHandle;
use crate::messaging::envelope::DocumentIndexRecord;

#[derive(Debug)]
pub struct DocumentIndexFetch<'a> {
    collaborators: &'a Collaborators,
}

impl<'a> DocumentIndexFetch<'a> {
    pub fn new(collaborators: &'a Collaborators) -> Self {
        Self { collaborators }
    }

    /// The delivery is acknowledged right after the download attempt,
    /// whatever its outcome. A failed download leaves the row "processing".
    pub async fn run(
        &self,
        record: &DocumentIndexRecord,
        envelope_is_new: Option<bool>,
        ack: &AckHandle,
    ) -> PipelineResult<()> {
        let c = self.collaborators;

        c.document_index.update_status(record.id, false).await?;

        let downloaded = c
            .downloader
            .download(&record.url, DownloadProtocol::Http)
            .await;
        ack.ack_once().await;

        let Some(document) = downloaded else {
            warn!(
                document_id = record.id,
                url = %record.url,
                "📥 Index download failed; record left processing"
            );
            return Err(PipelineError::download(&record.url));
        };

        c.document_index.update_status(record.id, true).await?;

        let partition_key = partition_key_for_year(record.year);
        let is_new = record.is_new.or(envelope_is_new).unwrap_or(false);
        let rows = c.content.process(&document, &partition_key, is_new).await?;

        debug!(
            document_id = record.id,
            partition_key = %partition_key,
            rows = rows,
            "Index content processed"
        );
        Ok(())
    }
}
