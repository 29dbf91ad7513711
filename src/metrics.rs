//! Lightweight global metrics for lock activity.
//!
//! Thread-safe atomic counters, process-wide. Relaxed ordering: counters are
//! informational and never used for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

static ACQUISITIONS: AtomicU64 = AtomicU64::new(0);
static CONTENDED: AtomicU64 = AtomicU64::new(0);
static WOULD_BLOCK: AtomicU64 = AtomicU64::new(0);
static TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static RELEASES: AtomicU64 = AtomicU64::new(0);
static REGISTRY_ENTRIES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub acquisitions: u64,
    /// Acquisitions (successful or not) whose first attempt found the lock taken.
    pub contended: u64,
    pub would_block: u64,
    pub timeouts: u64,
    pub releases: u64,
    pub registry_entries: u64,
}

impl MetricsSnapshot {
    pub fn contention_ratio(&self) -> f64 {
        let total = self.acquisitions + self.would_block + self.timeouts;
        if total == 0 {
            0.0
        } else {
            self.contended as f64 / total as f64
        }
    }
}

pub(crate) fn record_acquired() {
    ACQUISITIONS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_contended() {
    CONTENDED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_would_block() {
    WOULD_BLOCK.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_timeout() {
    TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_released() {
    RELEASES.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_registry_entry() {
    REGISTRY_ENTRIES.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        acquisitions: ACQUISITIONS.load(Ordering::Relaxed),
        contended: CONTENDED.load(Ordering::Relaxed),
        would_block: WOULD_BLOCK.load(Ordering::Relaxed),
        timeouts: TIMEOUTS.load(Ordering::Relaxed),
        releases: RELEASES.load(Ordering::Relaxed),
        registry_entries: REGISTRY_ENTRIES.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    ACQUISITIONS.store(0, Ordering::Relaxed);
    CONTENDED.store(0, Ordering::Relaxed);
    WOULD_BLOCK.store(0, Ordering::Relaxed);
    TIMEOUTS.store(0, Ordering::Relaxed);
    RELEASES.store(0, Ordering::Relaxed);
    REGISTRY_ENTRIES.store(0, Ordering::Relaxed);
}
