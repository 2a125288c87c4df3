//! Locker metrics exposed by an [crate::Environment].

use prometheus_client::{
    metrics::{counter::Counter, histogram::Histogram},
    registry::Registry,
};

/// Histogram buckets (in seconds) for time spent waiting on an isolate's locker.
///
/// Uncontended acquisitions land in the microsecond buckets, a thread queued behind
/// a long-running script in the sub-second ones.
const LOCK_WAIT: [f64; 12] = [
    3e-6, 1e-5, 3e-5, 1e-4, 3e-4, 0.001, 0.003, 0.01, 0.03, 0.1, 0.3, 1.0,
];

#[derive(Debug)]
pub(crate) struct Metrics {
    pub(crate) locks: Counter,
    pub(crate) unlocks: Counter,
    pub(crate) lock_wait: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            locks: Counter::default(),
            unlocks: Counter::default(),
            lock_wait: Histogram::new(LOCK_WAIT.into_iter()),
        }
    }
}

impl Metrics {
    pub(crate) fn register(&self, registry: &mut Registry) {
        registry.register(
            "locks",
            "Number of times the isolate locker was acquired",
            self.locks.clone(),
        );
        registry.register(
            "unlocks",
            "Number of times the isolate locker was released by an unlock",
            self.unlocks.clone(),
        );
        registry.register(
            "lock_wait",
            "Seconds spent waiting to acquire the isolate locker",
            self.lock_wait.clone(),
        );
    }
}
