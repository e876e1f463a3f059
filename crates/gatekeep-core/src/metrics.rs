//! Process-wide counters for gate activity.
//!
//! Counters are bumped at the call site. [`Metrics::flush`] emits all
//! current values as one `info!` event, normally at the end of a command.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    validations_run: AtomicU64,
    fast_forwards: AtomicU64,
    reverts_applied: AtomicU64,
    notifications_degraded: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            validations_run: AtomicU64::new(0),
            fast_forwards: AtomicU64::new(0),
            reverts_applied: AtomicU64::new(0),
            notifications_degraded: AtomicU64::new(0),
        }
    }

    /// One unit validation finished (any outcome).
    pub fn inc_validations(&self) {
        self.validations_run.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "validations_run", "counter incremented");
    }

    pub fn inc_fast_forwards(&self) {
        self.fast_forwards.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fast_forwards", "counter incremented");
    }

    pub fn inc_reverts(&self) {
        self.reverts_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reverts_applied", "counter incremented");
    }

    pub fn inc_notifications_degraded(&self) {
        self.notifications_degraded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notifications_degraded", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            validations_run = self.validations_run(),
            fast_forwards = self.fast_forwards(),
            reverts_applied = self.reverts_applied(),
            notifications_degraded = self.notifications_degraded(),
        );
    }

    pub fn validations_run(&self) -> u64 {
        self.validations_run.load(Ordering::Relaxed)
    }

    pub fn fast_forwards(&self) -> u64 {
        self.fast_forwards.load(Ordering::Relaxed)
    }

    pub fn reverts_applied(&self) -> u64 {
        self.reverts_applied.load(Ordering::Relaxed)
    }

    pub fn notifications_degraded(&self) -> u64 {
        self.notifications_degraded.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.validations_run.store(0, Ordering::Relaxed);
        self.fast_forwards.store(0, Ordering::Relaxed);
        self.reverts_applied.store(0, Ordering::Relaxed);
        self.notifications_degraded.store(0, Ordering::Relaxed);
    }
}
