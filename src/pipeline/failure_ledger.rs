//! # Failure Ledger
//!
//! Bounded in-memory record of envelopes whose strategy failed after the
//! delivery was already acknowledged. The broker no longer holds these
//! messages, so this ledger is the only place they can be inspected or
//! replayed from. Oldest entries are evicted at capacity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::constants::DEFAULT_FAILURE_LEDGER_CAPACITY;
use crate::error::PipelineError;
use crate::messaging::envelope::QueueEnvelope;

#[derive(Debug, Clone, PartialEq)]
pub struct FailedJob {
    pub envelope: QueueEnvelope,
    pub category: &'static str,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct FailureLedger {
    entries: Mutex<VecDeque<FailedJob>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_LEDGER_CAPACITY)
    }
}

impl FailureLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn record(&self, envelope: QueueEnvelope, error: &PipelineError) {
        self.push(envelope, error.category(), error.to_string());
    }

    /// Record a strategy that panicked instead of returning an error
    pub fn record_panic(&self, envelope: QueueEnvelope, message: &str) {
        self.push(envelope, "panic", format!("strategy panicked: {message}"));
    }

    fn push(&self, envelope: QueueEnvelope, category: &'static str, error: String) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(FailedJob {
            envelope,
            category,
            error,
            failed_at: Utc::now(),
        });
    }

    pub fn snapshot(&self) -> Vec<FailedJob> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Remove and return every entry, oldest first
    pub fn drain(&self) -> Vec<FailedJob> {
        self.entries.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
