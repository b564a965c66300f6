//! # In-Memory Broker
//!
//! Single-queue broker for tests and local development.
//!
//! ## Features
//!
//! - **Explicit acknowledgment**: a delivered message moves to the unacked set
//!   and only leaves the broker when its tag is acknowledged
//! - **Redelivery**: `requeue_unacked` returns unacknowledged deliveries to the
//!   ready queue flagged `redelivered`, as a broker does when a channel closes
//! - **Publish log**: every envelope sent through [`EnvelopePublisher`] is
//!   recorded with its AMQP properties, so delay headers can be asserted

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::BasicProperties;
use parking_lot::Mutex;

use super::ack::{IncomingDelivery, MessageAcker};
use super::envelope::QueueEnvelope;
use super::publisher::{delay_from_properties, publish_properties, EnvelopePublisher};
use crate::error::{PipelineError, PipelineResult};

/// An envelope accepted by [`InMemoryBroker::send_to_queue`]
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub body: Vec<u8>,
    pub properties: BasicProperties,
    /// Value of the delay header, `None` when absent
    pub delay_ms: Option<i64>,
}

impl PublishedMessage {
    pub fn envelope(&self) -> PipelineResult<QueueEnvelope> {
        QueueEnvelope::decode(&self.body)
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    next_tag: u64,
    ack_count: u64,
    published: Vec<PublishedMessage>,
}

/// In-memory broker; cheap to clone, clones share one queue
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a raw body on the ready queue, bypassing envelope encoding
    pub fn enqueue_raw(&self, body: impl Into<Vec<u8>>) {
        self.state.lock().ready.push_back(StoredMessage {
            body: body.into(),
            redelivered: false,
        });
    }

    /// Encode and enqueue an envelope for consumption
    pub fn enqueue(&self, envelope: &QueueEnvelope) -> PipelineResult<()> {
        self.enqueue_raw(envelope.encode()?);
        Ok(())
    }

    /// Hand out the next ready message; it stays unacked until its tag is acked
    pub fn next_delivery(&self) -> Option<IncomingDelivery> {
        let mut state = self.state.lock();
        let message = state.ready.pop_front()?;
        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        state.unacked.insert(delivery_tag, message.clone());

        Some(IncomingDelivery {
            delivery_tag,
            redelivered: message.redelivered,
            data: message.body,
            acker: Arc::new(InMemoryAcker {
                delivery_tag,
                state: Arc::clone(&self.state),
            }),
        })
    }

    /// Return every unacknowledged delivery to the ready queue; returns how many
    pub fn requeue_unacked(&self) -> usize {
        let mut state = self.state.lock();
        let mut tags: Vec<u64> = state.unacked.keys().copied().collect();
        tags.sort_unstable();

        let mut requeued = 0;
        for tag in tags {
            if let Some(mut message) = state.unacked.remove(&tag) {
                message.redelivered = true;
                state.ready.push_back(message);
                requeued += 1;
            }
        }
        requeued
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn unacked_len(&self) -> usize {
        self.state.lock().unacked.len()
    }

    /// Successful acknowledgments received so far
    pub fn ack_count(&self) -> u64 {
        self.state.lock().ack_count
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }
}

#[async_trait]
impl EnvelopePublisher for InMemoryBroker {
    async fn send_to_queue(&self, envelope: &QueueEnvelope, delay_ms: u64) {
        let body = match envelope.encode() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "In-memory publish dropped: encoding failed");
                return;
            }
        };

        let properties = publish_properties(delay_ms);
        let message = PublishedMessage {
            delay_ms: delay_from_properties(&properties),
            body: body.clone(),
            properties,
        };

        let mut state = self.state.lock();
        state.published.push(message);
        state.ready.push_back(StoredMessage {
            body,
            redelivered: false,
        });
    }
}

struct InMemoryAcker {
    delivery_tag: u64,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl MessageAcker for InMemoryAcker {
    async fn ack(&self) -> PipelineResult<()> {
        let mut state = self.state.lock();
        match state.unacked.remove(&self.delivery_tag) {
            Some(_) => {
                state.ack_count += 1;
                Ok(())
            }
            // A broker closes the channel on an unknown tag (PRECONDITION_FAILED)
            None => Err(PipelineError::connection(format!(
                "unknown delivery tag {}",
                self.delivery_tag
            ))),
        }
    }
}
