//! # Job Router
//!
//! Exhaustive dispatch from an envelope's payload variant to its strategy.

use std::sync::Arc;

use tracing::warn;

use super::bulk_sql::BulkSqlExecution;
use super::document_index::DocumentIndexFetch;
use super::ports::Collaborators;
use super::select_update::SelectAndUpdate;
use super::select_upsert::SelectAndUpsert;
use crate::error::PipelineResult;
use crate::messaging::ack::AckHandle;
use crate::messaging::envelope::{JobPayload, QueueEnvelope};
use crate::progress::ProgressTracker;

/// What happened to a routed envelope that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A strategy ran to completion
    Completed,
    /// No strategy consumes this type; the delivery is drained
    Drained,
}

#[derive(Debug, Clone)]
pub struct JobRouter {
    collaborators: Collaborators,
    progress: Arc<ProgressTracker>,
}

impl JobRouter {
    pub fn new(collaborators: Collaborators, progress: Arc<ProgressTracker>) -> Self {
        Self {
            collaborators,
            progress,
        }
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Run the strategy for `envelope`. Strategies ack through `ack` at the
    /// point their contract requires; the caller acks again afterwards and
    /// the handle turns that into a no-op.
    pub async fn route(
        &self,
        envelope: &QueueEnvelope,
        ack: &AckHandle,
    ) -> PipelineResult<RouteOutcome> {
        match &envelope.job {
            JobPayload::DocumentIndex(record) => {
                DocumentIndexFetch::new(&self.collaborators)
                    .run(record, envelope.is_new, ack)
                    .await?
            }
            JobPayload::DocumentSql(file) | JobPayload::DocumentListSql(file) => {
                BulkSqlExecution::new(&self.collaborators, &self.progress)
                    .run(file, ack)
                    .await?
            }
            JobPayload::DocumentListSqlSelect(file) => {
                SelectAndUpsert::new(&self.collaborators, &self.progress)
                    .run(file, envelope.is_new.unwrap_or(false), ack)
                    .await?
            }
            JobPayload::DocumentListSqlUpdate(file) => {
                SelectAndUpdate::new(&self.collaborators, &self.progress)
                    .run(file, ack)
                    .await?
            }
            JobPayload::DocumentList(_) | JobPayload::DocumentCollection(_) => {
                warn!(
                    link_type = %envelope.link_type(),
                    delivery_tag = ack.delivery_tag(),
                    "No strategy consumes this envelope type; draining"
                );
                return Ok(RouteOutcome::Drained);
            }
        }
        Ok(RouteOutcome::Completed)
    }
}
