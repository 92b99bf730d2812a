//! Global atomic counters for ICE observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an investigation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters — no allocations, no locking.
pub struct Metrics {
    nodes_dispatched: AtomicU64,
    node_retries: AtomicU64,
    node_timeouts: AtomicU64,
    node_failures: AtomicU64,
    events_published: AtomicU64,
    events_dropped: AtomicU64,
    cas_conflicts: AtomicU64,
    consolidation_fallbacks: AtomicU64,
    investigations_completed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            nodes_dispatched: AtomicU64::new(0),
            node_retries: AtomicU64::new(0),
            node_timeouts: AtomicU64::new(0),
            node_failures: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            cas_conflicts: AtomicU64::new(0),
            consolidation_fallbacks: AtomicU64::new(0),
            investigations_completed: AtomicU64::new(0),
        }
    }

    pub fn inc_nodes_dispatched(&self) {
        self.nodes_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_node_retries(&self) {
        self.node_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_node_timeouts(&self) {
        self.node_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_node_failures(&self) {
        self.node_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cas_conflicts(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_consolidation_fallbacks(&self) {
        self.consolidation_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_investigations_completed(&self) {
        self.investigations_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call at natural boundaries (end of an investigation, daemon tick)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            nodes_dispatched = self.nodes_dispatched(),
            node_retries = self.node_retries(),
            node_timeouts = self.node_timeouts(),
            node_failures = self.node_failures(),
            events_published = self.events_published(),
            events_dropped = self.events_dropped(),
            cas_conflicts = self.cas_conflicts(),
            consolidation_fallbacks = self.consolidation_fallbacks(),
            investigations_completed = self.investigations_completed(),
        );
    }

    pub fn nodes_dispatched(&self) -> u64 {
        self.nodes_dispatched.load(Ordering::Relaxed)
    }

    pub fn node_retries(&self) -> u64 {
        self.node_retries.load(Ordering::Relaxed)
    }

    pub fn node_timeouts(&self) -> u64 {
        self.node_timeouts.load(Ordering::Relaxed)
    }

    pub fn node_failures(&self) -> u64 {
        self.node_failures.load(Ordering::Relaxed)
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn cas_conflicts(&self) -> u64 {
        self.cas_conflicts.load(Ordering::Relaxed)
    }

    pub fn consolidation_fallbacks(&self) -> u64 {
        self.consolidation_fallbacks.load(Ordering::Relaxed)
    }

    pub fn investigations_completed(&self) -> u64 {
        self.investigations_completed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.nodes_dispatched.store(0, Ordering::Relaxed);
        self.node_retries.store(0, Ordering::Relaxed);
        self.node_timeouts.store(0, Ordering::Relaxed);
        self.node_failures.store(0, Ordering::Relaxed);
        self.events_published.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.cas_conflicts.store(0, Ordering::Relaxed);
        self.consolidation_fallbacks.store(0, Ordering::Relaxed);
        self.investigations_completed.store(0, Ordering::Relaxed);
    }
}
