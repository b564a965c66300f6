//! # Queue Consumer
//!
//! Subscribes to the work queue with explicit acknowledgment, decodes each
//! delivery into a [`QueueEnvelope`] and routes it to its strategy.
//!
//! ## Dispatch
//!
//! Deliveries are processed concurrently, one task each, bounded by a
//! semaphore sized to the prefetch count. No ordering holds between two
//! in-flight deliveries.
//!
//! ## Acknowledgment
//!
//! Every delivery is acknowledged exactly once, whatever happens to it:
//!
//! ```text
//! decode fails        -> log, ack                     (poison message drained)
//! strategy Ok         -> ack (no-op if strategy acked early)
//! strategy Err/panic  -> log, record in failure ledger, ack
//! ```
//!
//! Failures after an early ack cannot be redelivered by the broker. They are
//! kept in the [`FailureLedger`] and can be republished through the attached
//! publisher with [`QueueConsumer::replay_failures`].

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use lapin::options::{BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ack::{AckHandle, IncomingDelivery, MessageAcker};
use super::connection::{BrokerConnection, ShutdownHook};
use super::envelope::QueueEnvelope;
use super::in_memory::InMemoryBroker;
use super::publisher::EnvelopePublisher;
use crate::constants::DEFAULT_PREFETCH_COUNT;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::{log_error, log_job_outcome, log_queue_operation};
use crate::pipeline::{Collaborators, FailureLedger, JobRouter, RouteOutcome};
use crate::progress::{self, ProgressReport, ProgressTracker};

/// Queue preparation run on the consumer's channel before subscribing
pub type PrepareFn = Arc<dyn Fn(Channel) -> BoxFuture<'static, PipelineResult<()>> + Send + Sync>;

/// Default preparation: durable queue declaration and a prefetch bound
pub fn prepare_consumer(queue: impl Into<String>, prefetch: u16) -> PrepareFn {
    let queue = queue.into();
    Arc::new(move |channel: Channel| {
        let queue = queue.clone();
        async move {
            channel
                .queue_declare(
                    &queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    PipelineError::connection(format!("queue declaration failed for {queue}: {e}"))
                })?;

            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| PipelineError::connection(format!("basic.qos failed: {e}")))?;
            Ok(())
        }
        .boxed()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// `false` requires an explicit ack before the broker drops a message
    pub no_ack: bool,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self { no_ack: false }
    }
}

/// Result of processing one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed,
    /// Decoded, but no strategy consumes the type
    Drained,
    /// Body could not be decoded into an envelope
    Malformed,
    Failed(PipelineError),
    Panicked(String),
}

/// Consumer counters
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    acked: AtomicU64,
    ack_failures: AtomicU64,
    completed: AtomicU64,
    drained: AtomicU64,
    decode_failures: AtomicU64,
    strategy_failures: AtomicU64,
    download_failures: AtomicU64,
    panics: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub acked: u64,
    pub ack_failures: u64,
    pub completed: u64,
    pub drained: u64,
    pub decode_failures: u64,
    pub strategy_failures: u64,
    pub download_failures: u64,
    pub panics: u64,
}

impl ConsumerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            strategy_failures: self.strategy_failures.load(Ordering::Relaxed),
            download_failures: self.download_failures.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Acker for deliveries the broker already considers acknowledged
struct AutoAcker;

#[async_trait]
impl MessageAcker for AutoAcker {
    async fn ack(&self) -> PipelineResult<()> {
        Ok(())
    }
}

pub struct QueueConsumer {
    connection: Option<Arc<BrokerConnection>>,
    prepare: Option<PrepareFn>,
    router: JobRouter,
    failures: FailureLedger,
    publisher: RwLock<Option<Arc<dyn EnvelopePublisher>>>,
    stats: ConsumerStats,
    in_flight: Arc<Semaphore>,
}

impl std::fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("connection", &self.connection)
            .field("stats", &self.stats.snapshot())
            .field("available_permits", &self.in_flight.available_permits())
            .finish()
    }
}

impl QueueConsumer {
    /// Bind a broker connection and queue preparation callback.
    ///
    /// Installs the Ctrl+C shutdown hook for `connection` when called inside a
    /// Tokio runtime, replacing any hook a previous consumer installed.
    pub fn new(
        connection: Arc<BrokerConnection>,
        prepare: PrepareFn,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        if tokio::runtime::Handle::try_current().is_ok() {
            ShutdownHook::install_on_ctrl_c(Arc::clone(&connection));
        } else {
            warn!("No Tokio runtime at consumer construction; shutdown hook not installed");
        }
        Self::build(Some(connection), Some(prepare), collaborators)
    }

    /// A consumer without a broker connection, fed through [`Self::dispatch`]
    /// or [`Self::drain_in_memory`]
    pub fn detached(collaborators: Collaborators) -> Arc<Self> {
        Self::build(None, None, collaborators)
    }

    fn build(
        connection: Option<Arc<BrokerConnection>>,
        prepare: Option<PrepareFn>,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let tracker = Arc::new(ProgressTracker::default());
        progress::subscribe(&tracker);

        Arc::new(Self {
            connection,
            prepare,
            router: JobRouter::new(collaborators, tracker),
            failures: FailureLedger::default(),
            publisher: RwLock::new(None),
            stats: ConsumerStats::default(),
            in_flight: Arc::new(Semaphore::new(usize::from(DEFAULT_PREFETCH_COUNT))),
        })
    }

    /// Subscribe to `queue` and process deliveries until the stream ends
    /// (connection closed or consumer cancelled).
    pub async fn consume(
        self: &Arc<Self>,
        queue: &str,
        options: ConsumeOptions,
    ) -> PipelineResult<JoinHandle<()>> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| PipelineError::connection("consumer has no broker connection"))?;
        connection.open().await?;

        let channel = connection.create_channel().await?;
        if let Some(prepare) = &self.prepare {
            prepare(channel.clone()).await?;
        }

        let consumer_tag = format!("filings-consumer-{}", Uuid::new_v4());
        let mut deliveries = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: options.no_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::connection(format!("basic.consume failed: {e}")))?;

        log_queue_operation("consume", queue, "subscribed", Some(&consumer_tag));

        let this = Arc::clone(self);
        let queue = queue.to_string();
        Ok(tokio::spawn(async move {
            // The channel must outlive the delivery stream
            let _channel = channel;

            while let Some(delivery) = deliveries.next().await {
                match delivery {
                    Ok(delivery) => {
                        let mut incoming = IncomingDelivery::from(delivery);
                        if options.no_ack {
                            incoming.acker = Arc::new(AutoAcker);
                        }
                        this.dispatch(incoming).await;
                    }
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "Delivery stream error; stopping consumer");
                        break;
                    }
                }
            }

            info!(queue = %queue, "🛑 Consumer delivery stream ended");
        }))
    }

    /// Spawn processing of one delivery once an in-flight slot is free
    pub async fn dispatch(self: &Arc<Self>, delivery: IncomingDelivery) -> JoinHandle<ProcessOutcome> {
        let permit = Arc::clone(&self.in_flight).acquire_owned().await.ok();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let _permit = permit;
            this.process_message(delivery).await
        })
    }

    /// Process every message currently ready on `broker` and wait for all of
    /// them to finish
    pub async fn drain_in_memory(self: &Arc<Self>, broker: &InMemoryBroker) -> Vec<ProcessOutcome> {
        let mut handles = Vec::new();
        while let Some(delivery) = broker.next_delivery() {
            handles.push(self.dispatch(delivery).await);
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Delivery task failed to join"),
            }
        }
        outcomes
    }

    /// Decode, route and acknowledge one delivery. Never fails: every
    /// outcome is logged and the delivery is acked exactly once.
    pub async fn process_message(&self, delivery: IncomingDelivery) -> ProcessOutcome {
        ConsumerStats::inc(&self.stats.received);
        let ack = AckHandle::new(delivery.delivery_tag, Arc::clone(&delivery.acker));

        let envelope = match QueueEnvelope::decode(&delivery.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                ConsumerStats::inc(&self.stats.decode_failures);
                log_error(
                    "queue_consumer",
                    "decode",
                    &e.to_string(),
                    Some(&format!(
                        "delivery_tag={} redelivered={} bytes={}",
                        delivery.delivery_tag,
                        delivery.redelivered,
                        delivery.data.len()
                    )),
                );
                self.finish(&ack).await;
                return ProcessOutcome::Malformed;
            }
        };

        let link_type = envelope.link_type();
        debug!(
            delivery_tag = delivery.delivery_tag,
            link_type = %link_type,
            "📥 Envelope received"
        );

        let routed = AssertUnwindSafe(self.router.route(&envelope, &ack))
            .catch_unwind()
            .await;

        let outcome = match routed {
            Ok(Ok(RouteOutcome::Completed)) => {
                ConsumerStats::inc(&self.stats.completed);
                log_job_outcome(link_type.as_str(), "completed", None);
                ProcessOutcome::Completed
            }
            Ok(Ok(RouteOutcome::Drained)) => {
                ConsumerStats::inc(&self.stats.drained);
                log_job_outcome(link_type.as_str(), "drained", None);
                ProcessOutcome::Drained
            }
            Ok(Err(e)) => {
                if e.is_download() {
                    ConsumerStats::inc(&self.stats.download_failures);
                } else {
                    ConsumerStats::inc(&self.stats.strategy_failures);
                }
                log_error(
                    "queue_consumer",
                    link_type.as_str(),
                    &e.to_string(),
                    Some(e.category()),
                );
                self.failures.record(envelope, &e);
                ProcessOutcome::Failed(e)
            }
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };

                ConsumerStats::inc(&self.stats.panics);
                log_error(
                    "queue_consumer",
                    link_type.as_str(),
                    &message,
                    Some("strategy panicked"),
                );
                self.failures.record_panic(envelope, &message);
                ProcessOutcome::Panicked(message)
            }
        };

        self.finish(&ack).await;
        outcome
    }

    async fn finish(&self, ack: &AckHandle) {
        ack.ack_once().await;
        if ack.is_confirmed() {
            ConsumerStats::inc(&self.stats.acked);
        } else {
            ConsumerStats::inc(&self.stats.ack_failures);
        }
    }

    pub fn set_queue_publisher(&self, publisher: Arc<dyn EnvelopePublisher>) {
        *self.publisher.write() = Some(publisher);
    }

    pub fn queue_publisher(&self) -> Option<Arc<dyn EnvelopePublisher>> {
        self.publisher.read().clone()
    }

    /// Current tick for `name`, `-1` when no progress is known
    pub fn get_tick_from_publish_process(&self, name: &str) -> i64 {
        self.router.progress().tick(name)
    }

    /// Seed progress for `name` at tick 0 of 1 on every live consumer.
    /// Returns the number of trackers that received the report.
    pub fn start_publish_process(name: &str) -> usize {
        progress::publish_progress(&ProgressReport::new(name, 0, 1))
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        self.router.progress()
    }

    pub fn failures(&self) -> &FailureLedger {
        &self.failures
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Republish every ledger entry through the attached publisher, each
    /// delayed by `delay_ms`. Entries are removed from the ledger; returns
    /// how many were sent.
    pub async fn replay_failures(&self, delay_ms: u64) -> usize {
        let Some(publisher) = self.queue_publisher() else {
            warn!(
                pending = self.failures.len(),
                "No queue publisher attached; failures not replayed"
            );
            return 0;
        };

        let failed = self.failures.drain();
        for job in &failed {
            publisher.send_to_queue(&job.envelope, delay_ms).await;
        }

        if !failed.is_empty() {
            info!(
                replayed = failed.len(),
                delay_ms = delay_ms,
                "🔁 Failed envelopes republished"
            );
        }
        failed.len()
    }

    /// Close the broker connection, if this consumer owns one
    pub async fn close(&self) {
        if let Some(connection) = &self.connection {
            connection.close().await;
        }
    }
}
