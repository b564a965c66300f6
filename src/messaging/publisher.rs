//! # Queue Publisher
//!
//! Publishes envelopes onto the work queue through a delayed-delivery
//! exchange (rabbitmq-delayed-message-exchange plugin).
//!
//! ## Topology
//!
//! ```text
//! exchange  <AMQP_EXCHANGE>  type x-delayed-message, x-delayed-type=direct, durable
//!    │  routing key = <AMQP_QUEUE>
//!    ▼
//! queue     <AMQP_QUEUE>     durable
//! ```
//!
//! A delay is a per-message `x-delay` header, never exchange or queue state.
//!
//! ## Failure contract
//!
//! `send_to_queue` never returns an error: a failed publish is logged and
//! counted in [`PublisherStats`], and the calling pipeline step carries on.
//! Callers cannot tell an enqueued envelope from a dropped one by the return
//! value, which is why the `dropped` counter exists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, ExchangeKind};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::connection::BrokerConnection;
use super::envelope::QueueEnvelope;
use crate::config::BrokerSettings;
use crate::constants::amqp::{
    CONTENT_TYPE_JSON, DELAYED_EXCHANGE_TYPE, DELAYED_TYPE_ARGUMENT, DELAYED_TYPE_DIRECT,
    DELAY_HEADER, PERSISTENT_DELIVERY_MODE, REPLY_SUCCESS,
};
use crate::error::{PipelineError, PipelineResult};
use crate::logging::log_queue_operation;

/// Enqueue side of the pipeline
#[async_trait]
pub trait EnvelopePublisher: Send + Sync + 'static {
    /// Publish `envelope`, deferring delivery by `delay_ms` when non-zero.
    /// Failures are logged and swallowed.
    async fn send_to_queue(&self, envelope: &QueueEnvelope, delay_ms: u64);
}

/// Header table for a publish, present only when a delay is requested
pub fn delivery_headers(delay_ms: u64) -> Option<FieldTable> {
    if delay_ms == 0 {
        return None;
    }

    let mut headers = FieldTable::default();
    headers.insert(
        DELAY_HEADER.into(),
        AMQPValue::LongLongInt(i64::try_from(delay_ms).unwrap_or(i64::MAX)),
    );
    Some(headers)
}

/// AMQP properties for an envelope body
pub fn publish_properties(delay_ms: u64) -> BasicProperties {
    let properties = BasicProperties::default()
        .with_content_type(CONTENT_TYPE_JSON.into())
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE);

    match delivery_headers(delay_ms) {
        Some(headers) => properties.with_headers(headers),
        None => properties,
    }
}

/// Read the delay header back from publish properties
pub fn delay_from_properties(properties: &BasicProperties) -> Option<i64> {
    let headers = properties.headers().as_ref()?;
    let (_, value) = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == DELAY_HEADER)?;
    match value {
        AMQPValue::LongLongInt(ms) => Some(*ms),
        AMQPValue::LongInt(ms) => Some(i64::from(*ms)),
        AMQPValue::LongUInt(ms) => Some(i64::from(*ms)),
        _ => None,
    }
}

/// Publish counters; `dropped` makes swallowed failures observable
#[derive(Debug, Default)]
pub struct PublisherStats {
    published: AtomicU64,
    dropped: AtomicU64,
}

impl PublisherStats {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// lapin-backed publisher over a confirm-mode channel
pub struct QueuePublisher {
    settings: BrokerSettings,
    connection: RwLock<Option<Arc<BrokerConnection>>>,
    channel: RwLock<Option<Channel>>,
    stats: PublisherStats,
}

impl std::fmt::Debug for QueuePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePublisher")
            .field("exchange", &self.settings.exchange)
            .field("queue", &self.settings.queue)
            .field("published", &self.stats.published())
            .field("dropped", &self.stats.dropped())
            .finish()
    }
}

impl QueuePublisher {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            connection: RwLock::new(None),
            channel: RwLock::new(None),
            stats: PublisherStats::default(),
        }
    }

    /// Open the connection and confirm channel, declare the delayed exchange
    /// and bind the work queue to it. Do not publish if this fails.
    pub async fn connect(&self) -> PipelineResult<()> {
        let connection =
            Arc::new(BrokerConnection::connect(&self.settings.url, "filings-publisher").await?);
        let channel = connection.create_channel().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PipelineError::connection(format!("confirm.select failed: {e}")))?;

        let mut exchange_args = FieldTable::default();
        exchange_args.insert(
            DELAYED_TYPE_ARGUMENT.into(),
            AMQPValue::LongString(DELAYED_TYPE_DIRECT.into()),
        );
        channel
            .exchange_declare(
                &self.settings.exchange,
                ExchangeKind::Custom(DELAYED_EXCHANGE_TYPE.to_string()),
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                exchange_args,
            )
            .await
            .map_err(|e| {
                PipelineError::connection(format!(
                    "delayed exchange declaration failed for {}: {e}",
                    self.settings.exchange
                ))
            })?;

        channel
            .queue_declare(
                &self.settings.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                PipelineError::connection(format!(
                    "queue declaration failed for {}: {e}",
                    self.settings.queue
                ))
            })?;

        channel
            .queue_bind(
                &self.settings.queue,
                &self.settings.exchange,
                &self.settings.queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                PipelineError::connection(format!(
                    "binding {} to {} failed: {e}",
                    self.settings.queue, self.settings.exchange
                ))
            })?;

        *self.channel.write().await = Some(channel);
        *self.connection.write().await = Some(connection);

        log_queue_operation(
            "publisher_connect",
            &self.settings.queue,
            "connected",
            Some(&self.settings.redacted_url()),
        );
        Ok(())
    }

    /// Close channel then connection; missing handles are skipped
    pub async fn disconnect(&self) {
        if let Some(channel) = self.channel.write().await.take() {
            if let Err(e) = channel.close(REPLY_SUCCESS, "publisher disconnect").await {
                debug!(error = %e, "Publisher channel close reported an error");
            }
        }

        if let Some(connection) = self.connection.write().await.take() {
            connection.close().await;
        }
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    async fn try_publish(&self, envelope: &QueueEnvelope, delay_ms: u64) -> PipelineResult<()> {
        let body = envelope.encode()?;
        let channel = self.channel.read().await.clone().ok_or_else(|| {
            PipelineError::publish(&self.settings.exchange, "publisher is not connected")
        })?;

        let confirm = channel
            .basic_publish(
                &self.settings.exchange,
                &self.settings.queue,
                BasicPublishOptions::default(),
                &body,
                publish_properties(delay_ms),
            )
            .await
            .map_err(|e| PipelineError::publish(&self.settings.exchange, e.to_string()))?;

        let confirmation = confirm.await.map_err(|e| {
            PipelineError::publish(&self.settings.exchange, format!("confirmation failed: {e}"))
        })?;

        if confirmation.is_nack() {
            return Err(PipelineError::publish(
                &self.settings.exchange,
                "broker negatively acknowledged the publish",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EnvelopePublisher for QueuePublisher {
    async fn send_to_queue(&self, envelope: &QueueEnvelope, delay_ms: u64) {
        match self.try_publish(envelope, delay_ms).await {
            Ok(()) => {
                self.stats.record_published();
                debug!(
                    link_type = %envelope.link_type(),
                    delay_ms = delay_ms,
                    "📤 Envelope published"
                );
            }
            Err(e) => {
                self.stats.record_dropped();
                error!(
                    link_type = %envelope.link_type(),
                    delay_ms = delay_ms,
                    error = %e,
                    dropped_total = self.stats.dropped(),
                    "📭 Envelope dropped: publish failed"
                );
            }
        }
    }
}

impl Drop for QueuePublisher {
    fn drop(&mut self) {
        if self.stats.dropped() > 0 {
            warn!(
                published = self.stats.published(),
                dropped = self.stats.dropped(),
                "Publisher released with dropped envelopes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::{FileReference, JobPayload};

    #[test]
    fn test_no_delay_means_no_headers() {
        let properties = publish_properties(0);
        assert!(properties.headers().is_none());
        assert_eq!(delay_from_properties(&properties), None);
        assert_eq!(
            properties.content_type().as_ref().map(|c| c.as_str()),
            Some(CONTENT_TYPE_JSON)
        );
    }

    #[test]
    fn test_delay_header_carries_milliseconds() {
        let properties = publish_properties(5000);
        assert_eq!(delay_from_properties(&properties), Some(5000));
        assert_eq!(*properties.delivery_mode(), Some(PERSISTENT_DELIVERY_MODE));
    }

    #[tokio::test]
    async fn test_send_without_connection_is_dropped_not_raised() {
        let publisher = QueuePublisher::new(BrokerSettings::default());
        let envelope =
            QueueEnvelope::new(JobPayload::DocumentSql(FileReference::at_path("/tmp/a.sql")));

        publisher.send_to_queue(&envelope, 0).await;

        assert_eq!(publisher.stats().published(), 0);
        assert_eq!(publisher.stats().dropped(), 1);
        publisher.disconnect().await;
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn lines_containing(&self, needle: &str) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .filter(|line| line.contains(needle))
                .map(str::to_string)
                .collect()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_dropped_envelopes_are_logged_at_error_and_on_release() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let publisher = QueuePublisher::new(BrokerSettings::default());
        let envelope =
            QueueEnvelope::new(JobPayload::DocumentSql(FileReference::at_path("/tmp/a.sql")));
        publisher.send_to_queue(&envelope, 250).await;

        let dropped = logs.lines_containing("Envelope dropped");
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].contains("ERROR"), "{}", dropped[0]);

        drop(publisher);
        let released = logs.lines_containing("Publisher released with dropped envelopes");
        assert_eq!(released.len(), 1);
        assert!(released[0].contains("WARN"), "{}", released[0]);
    }

    #[tokio::test]
    #[ignore = "requires RabbitMQ with the delayed message exchange plugin running"]
    async fn test_publisher_connects_and_publishes() {
        let settings = BrokerSettings::from_env().unwrap();
        let publisher = QueuePublisher::new(settings);
        publisher.connect().await.unwrap();

        let envelope =
            QueueEnvelope::new(JobPayload::DocumentSql(FileReference::at_path("/tmp/a.sql")));
        publisher.send_to_queue(&envelope, 1000).await;

        assert_eq!(publisher.stats().published(), 1);
        publisher.disconnect().await;
    }
}
