//! # Delivery Acknowledgment
//!
//! Strategies acknowledge a delivery early (right after the primary side
//! effect) and the consumer acknowledges again once processing ends, so the
//! same delivery can be asked to ack twice. On AMQP a second `basic.ack` for
//! one delivery tag is a channel-level error that would take every other
//! in-flight delivery on the channel down with it. [`AckHandle`] makes the
//! acknowledgment idempotent: only the first call reaches the broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::BasicAckOptions;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// Broker-side acknowledgment of one delivery
#[async_trait]
pub trait MessageAcker: Send + Sync + 'static {
    async fn ack(&self) -> PipelineResult<()>;
}

/// Acknowledges through the lapin channel the delivery arrived on
#[derive(Clone)]
pub struct LapinAcker {
    acker: lapin::acker::Acker,
}

impl std::fmt::Debug for LapinAcker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LapinAcker").finish_non_exhaustive()
    }
}

impl LapinAcker {
    pub fn new(acker: lapin::acker::Acker) -> Self {
        Self { acker }
    }
}

#[async_trait]
impl MessageAcker for LapinAcker {
    async fn ack(&self) -> PipelineResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::connection(format!("basic.ack failed: {e}")))
    }
}

/// A raw message handed to the consumer by the broker
#[derive(Clone)]
pub struct IncomingDelivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub data: Vec<u8>,
    pub acker: Arc<dyn MessageAcker>,
}

impl std::fmt::Debug for IncomingDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingDelivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl From<lapin::message::Delivery> for IncomingDelivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            data: delivery.data,
            acker: Arc::new(LapinAcker::new(delivery.acker)),
        }
    }
}

/// At-most-once acknowledgment guard for a single delivery
pub struct AckHandle {
    delivery_tag: u64,
    acker: Arc<dyn MessageAcker>,
    acked: AtomicBool,
    confirmed: AtomicBool,
}

impl AckHandle {
    pub fn new(delivery_tag: u64, acker: Arc<dyn MessageAcker>) -> Self {
        Self {
            delivery_tag,
            acker,
            acked: AtomicBool::new(false),
            confirmed: AtomicBool::new(false),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Acknowledge unless already done. Returns `true` when this call was the
    /// one that sent the ack.
    ///
    /// A failed ack (channel closed during shutdown) is logged and still
    /// counts as the attempt; it is never retried.
    pub async fn ack_once(&self) -> bool {
        if self.acked.swap(true, Ordering::SeqCst) {
            return false;
        }

        match self.acker.ack().await {
            Ok(()) => {
                self.confirmed.store(true, Ordering::SeqCst);
                debug!(delivery_tag = self.delivery_tag, "✅ Delivery acknowledged");
            }
            Err(e) => warn!(
                delivery_tag = self.delivery_tag,
                error = %e,
                "⚠️ Acknowledgment failed; broker will redeliver once the channel recovers"
            ),
        }
        true
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }

    /// Whether the broker accepted the ack (false until it has, and forever
    /// after a failed attempt)
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("delivery_tag", &self.delivery_tag)
            .field("acked", &self.is_acked())
            .field("confirmed", &self.is_confirmed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingAcker {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MessageAcker for CountingAcker {
        async fn ack(&self) -> PipelineResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PipelineError::connection("channel closed"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_ack_once_reaches_broker_once() {
        let acker = Arc::new(CountingAcker::default());
        let handle = AckHandle::new(7, acker.clone());

        assert!(!handle.is_acked());
        assert!(handle.ack_once().await);
        assert!(!handle.ack_once().await);
        assert!(handle.is_acked());
        assert!(handle.is_confirmed());
        assert_eq!(acker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_ack_is_not_retried() {
        let acker = Arc::new(CountingAcker {
            fail: true,
            ..Default::default()
        });
        let handle = AckHandle::new(8, acker.clone());

        assert!(handle.ack_once().await);
        assert!(!handle.ack_once().await);
        assert!(handle.is_acked());
        assert!(!handle.is_confirmed());
        assert_eq!(acker.calls.load(Ordering::SeqCst), 1);
    }
}
