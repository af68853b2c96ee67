//! Observability counters for the engine.
//!
//! Counters are observational only; unread badges are always derived from
//! the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared engine counters. Clones share the same values.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    events_ingested: AtomicU64,
    events_rejected: AtomicU64,
    notifications_created: AtomicU64,
    notifications_merged: AtomicU64,
    broadcast_lagged: AtomicU64,
    notifications_swept: AtomicU64,
    store_timeouts: AtomicU64,
    milestones_suppressed: AtomicU64,
    sink_dropped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_ingested(&self) {
        self.inner.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.inner.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_created(&self) {
        self.inner.notifications_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merged(&self) {
        self.inner.notifications_merged.fetch_add(1, Ordering::Relaxed);
    }

    /// Record events a lagging subscriber missed.
    pub(crate) fn record_lagged(&self, missed: u64) {
        self.inner
            .broadcast_lagged
            .fetch_add(missed, Ordering::Relaxed);
    }

    pub(crate) fn record_swept(&self, count: u64) {
        self.inner
            .notifications_swept
            .fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.inner.store_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A candidate whose milestones were all claimed by another producer.
    pub(crate) fn record_suppressed(&self) {
        self.inner
            .milestones_suppressed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record changes a lagging delivery sink missed.
    pub(crate) fn record_sink_dropped(&self, missed: u64) {
        self.inner.sink_dropped.fetch_add(missed, Ordering::Relaxed);
    }

    pub fn events_ingested(&self) -> u64 {
        self.inner.events_ingested.load(Ordering::Relaxed)
    }

    pub fn events_rejected(&self) -> u64 {
        self.inner.events_rejected.load(Ordering::Relaxed)
    }

    pub fn notifications_created(&self) -> u64 {
        self.inner.notifications_created.load(Ordering::Relaxed)
    }

    pub fn notifications_merged(&self) -> u64 {
        self.inner.notifications_merged.load(Ordering::Relaxed)
    }

    pub fn broadcast_lagged(&self) -> u64 {
        self.inner.broadcast_lagged.load(Ordering::Relaxed)
    }

    pub fn notifications_swept(&self) -> u64 {
        self.inner.notifications_swept.load(Ordering::Relaxed)
    }

    pub fn store_timeouts(&self) -> u64 {
        self.inner.store_timeouts.load(Ordering::Relaxed)
    }

    pub fn milestones_suppressed(&self) -> u64 {
        self.inner.milestones_suppressed.load(Ordering::Relaxed)
    }

    pub fn sink_dropped(&self) -> u64 {
        self.inner.sink_dropped.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_ingested: self.events_ingested(),
            events_rejected: self.events_rejected(),
            notifications_created: self.notifications_created(),
            notifications_merged: self.notifications_merged(),
            broadcast_lagged: self.broadcast_lagged(),
            notifications_swept: self.notifications_swept(),
            store_timeouts: self.store_timeouts(),
            milestones_suppressed: self.milestones_suppressed(),
            sink_dropped: self.sink_dropped(),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.inner.events_ingested,
            &self.inner.events_rejected,
            &self.inner.notifications_created,
            &self.inner.notifications_merged,
            &self.inner.broadcast_lagged,
            &self.inner.notifications_swept,
            &self.inner.store_timeouts,
            &self.inner.milestones_suppressed,
            &self.inner.sink_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub events_ingested: u64,
    pub events_rejected: u64,
    pub notifications_created: u64,
    pub notifications_merged: u64,
    pub broadcast_lagged: u64,
    pub notifications_swept: u64,
    pub store_timeouts: u64,
    pub milestones_suppressed: u64,
    pub sink_dropped: u64,
}

impl MetricsSnapshot {
    /// Fraction of admitted candidates that merged into an existing record.
    ///
    /// Returns 0.0 if nothing has been admitted.
    pub fn merge_rate(&self) -> f64 {
        let total = self
            .notifications_created
            .saturating_add(self.notifications_merged);
        if total == 0 {
            0.0
        } else {
            self.notifications_merged as f64 / total as f64
        }
    }
}
