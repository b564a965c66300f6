#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, PostgreSQL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Filings Pipeline
//!
//! Broker-mediated job pipeline for filings data: a consumer that receives
//! typed work items from a durable RabbitMQ queue and routes each to a
//! processing strategy, and a publisher that enqueues work back onto the
//! broker through a delayed-delivery exchange.
//!
//! ## Architecture
//!
//! ```text
//! QueuePublisher ──x-delay──▶ delayed exchange ──▶ queue ──▶ QueueConsumer
//!                                                              │ decode
//!                                                              ▼
//!                                                          JobRouter
//!                    ┌──────────────────┬──────────────────────┼─────────────────────┐
//!            DocumentIndexFetch   BulkSqlExecution     SelectAndUpsert       SelectAndUpdate
//!                    │                  │                      │                     │
//!           downloader, index repo   list repo           sql + list repo           sql
//! ```
//!
//! Acknowledgment favours throughput over durability: a delivery is acked
//! whether or not its strategy succeeds, so one failing message can never
//! stall the shared consumer loop. Failures are surfaced through structured
//! logs, consumer statistics and the in-memory failure ledger, from which
//! they can be replayed.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Envelope codec, connection lifecycle, publisher, consumer
//! - [`pipeline`] - Processing strategies, collaborator ports, failure ledger
//! - [`progress`] - In-memory progress tracker and progress bus
//! - [`services`] - Filesystem, HTTP and PostgreSQL collaborators
//! - [`config`] - Environment configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filings_pipeline::config::BrokerSettings;
//! use filings_pipeline::messaging::{
//!     EnvelopePublisher, FileReference, JobPayload, QueueEnvelope, QueuePublisher,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let publisher = QueuePublisher::new(BrokerSettings::from_env()?);
//! publisher.connect().await?;
//!
//! let envelope = QueueEnvelope::new(JobPayload::DocumentSql(FileReference::at_path(
//!     "/var/lib/filings/batch-0001.sql",
//! )));
//! publisher.send_to_queue(&envelope, 5_000).await;
//! publisher.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! [`messaging::InMemoryBroker`] replaces RabbitMQ in tests; no test needs a
//! live broker or database. Broker-backed smoke tests are `#[ignore]`d.
//!
//! ```bash
//! cargo test                 # Unit and integration tests
//! cargo test -- --ignored    # Smoke tests against a local RabbitMQ
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod progress;
pub mod services;

pub use config::{BrokerSettings, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use messaging::{
    EnvelopePublisher, InMemoryBroker, JobPayload, LinkType, QueueConsumer, QueueEnvelope,
    QueuePublisher,
};
pub use pipeline::{Collaborators, JobRouter};
pub use progress::{ProgressRecord, ProgressTracker, UNKNOWN_TICK};
