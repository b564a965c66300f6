//! # Progress Tracker
//!
//! Best-effort, in-memory progress records for long-running named processes
//! (chunked list generation, bulk loads). Pollers read a tick for a name; an
//! absent record reads as [`UNKNOWN_TICK`].
//!
//! Records are never persisted and are not a source of truth for completion.
//! The map is bounded: when a new name arrives at capacity, the record updated
//! least recently is evicted. A record is also removed as soon as its
//! pipeline completes (`tick >= total` through [`ProgressTracker::advance`]).
//!
//! ## Progress bus
//!
//! Producers that have no handle on a consumer (for example
//! [`QueueConsumer::start_publish_process`](crate::messaging::QueueConsumer::start_publish_process))
//! report through [`publish_progress`]. Every live tracker registered with
//! [`subscribe`] receives the report synchronously; trackers are held weakly
//! so a dropped consumer unregisters itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::DEFAULT_PROGRESS_CAPACITY;

/// Tick reported for a name with no record
pub const UNKNOWN_TICK: i64 = -1;

/// Units completed and expected for one named process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub tick: u64,
    pub total: u64,
}

impl ProgressRecord {
    pub fn is_complete(&self) -> bool {
        self.tick >= self.total
    }

    fn merge(&mut self, tick: u64, total: u64) {
        self.tick = self.tick.max(tick);
        self.total = self.total.max(total).max(self.tick);
    }
}

/// A progress report addressed to a process name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub name: String,
    pub tick: u64,
    pub total: u64,
}

impl ProgressReport {
    pub fn new(name: impl Into<String>, tick: u64, total: u64) -> Self {
        Self {
            name: name.into(),
            tick,
            total,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    record: ProgressRecord,
    updated_seq: u64,
}

/// Bounded name → (tick, total) registry
#[derive(Debug)]
pub struct ProgressTracker {
    records: DashMap<String, Slot>,
    capacity: usize,
    sequence: AtomicU64,
    evicted: AtomicU64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CAPACITY)
    }
}

impl ProgressTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: DashMap::new(),
            capacity: capacity.max(1),
            sequence: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Upsert a record. Ticks never move backwards and the total is raised
    /// to cover the tick, so a late or out-of-order report cannot undo work
    /// already observed.
    pub fn report(&self, name: &str, tick: u64, total: u64) -> ProgressRecord {
        self.make_room_for(name);
        let seq = self.next_seq();

        let mut slot = self.records.entry(name.to_string()).or_insert(Slot {
            record: ProgressRecord { tick, total },
            updated_seq: seq,
        });
        slot.record.merge(tick, total);
        slot.updated_seq = seq;
        slot.record
    }

    /// Count one more unit toward `total`; the record is removed once the
    /// tick reaches the total. Returns the record as of this update.
    pub fn advance(&self, name: &str, total: u64) -> ProgressRecord {
        self.make_room_for(name);
        let seq = self.next_seq();

        let record = {
            let mut slot = self.records.entry(name.to_string()).or_insert(Slot {
                record: ProgressRecord { tick: 0, total },
                updated_seq: seq,
            });
            let next_tick = slot.record.tick + 1;
            slot.record.merge(next_tick, total);
            slot.updated_seq = seq;
            slot.record
        };

        if record.is_complete() {
            self.records
                .remove_if(name, |_, slot| slot.record.is_complete());
            debug!(name = %name, tick = record.tick, total = record.total, "Progress complete");
        }
        record
    }

    pub fn query(&self, name: &str) -> Option<ProgressRecord> {
        self.records.get(name).map(|slot| slot.record)
    }

    /// Current tick, or [`UNKNOWN_TICK`] when no record exists
    pub fn tick(&self, name: &str) -> i64 {
        self.query(name)
            .map(|record| i64::try_from(record.tick).unwrap_or(i64::MAX))
            .unwrap_or(UNKNOWN_TICK)
    }

    /// Drop the record for a finished pipeline
    pub fn complete(&self, name: &str) -> Option<ProgressRecord> {
        self.records.remove(name).map(|(_, slot)| slot.record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records dropped to stay within capacity
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn make_room_for(&self, name: &str) {
        while !self.records.contains_key(name) && self.records.len() >= self.capacity {
            let stalest = self
                .records
                .iter()
                .min_by_key(|entry| entry.value().updated_seq)
                .map(|entry| entry.key().clone());

            let Some(stalest) = stalest else {
                break;
            };
            if self.records.remove(&stalest).is_some() {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                debug!(name = %stalest, "Evicted stale progress record");
            }
        }
    }
}

static PROGRESS_BUS: OnceLock<RwLock<Vec<Weak<ProgressTracker>>>> = OnceLock::new();

fn bus() -> &'static RwLock<Vec<Weak<ProgressTracker>>> {
    PROGRESS_BUS.get_or_init(|| RwLock::new(Vec::new()))
}

/// Register a tracker to receive bus reports for as long as it is alive
pub fn subscribe(tracker: &Arc<ProgressTracker>) {
    let mut subscribers = bus().write();
    subscribers.retain(|weak| weak.strong_count() > 0);
    if !subscribers
        .iter()
        .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(tracker)))
    {
        subscribers.push(Arc::downgrade(tracker));
    }
}

/// Apply a report to every live subscribed tracker; returns how many received it
pub fn publish_progress(report: &ProgressReport) -> usize {
    let live: Vec<Arc<ProgressTracker>> = {
        let mut subscribers = bus().write();
        subscribers.retain(|weak| weak.strong_count() > 0);
        subscribers.iter().filter_map(Weak::upgrade).collect()
    };

    for tracker in &live {
        tracker.report(&report.name, report.tick, report.total);
    }
    live.len()
}
