//! Metrics contract consumed by the queue.
//!
//! The counters registry itself lives outside this crate; the queue only
//! reports into whatever implementation it was given.

use crate::events::QueueEventKind;
use std::time::Duration;

/// Sink for queue observability signals.
pub trait QueueMetrics: Send + Sync {
    /// Called once per emitted queue event.
    fn record_event(&self, _kind: QueueEventKind) {}

    /// Called by the age sampler with the age of the oldest pending job
    /// (zero when nothing is pending).
    fn record_oldest_pending_age(&self, _age: Duration) {}
}

/// Metrics sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl QueueMetrics for NoopMetrics {}
