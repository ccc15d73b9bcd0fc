//! Typed queue events and observers.

use crate::job::Job;
use dashmap::DashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

/// Kinds of events a queue emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEventKind {
    /// A job handler succeeded
    Processed,
    /// A job handler failed (any attempt)
    Failed,
    /// A failed job was re-admitted for another attempt
    Retried,
    /// A job failed its last attempt and was dropped
    Dead,
    /// Dispatch was paused
    Paused,
    /// Dispatch was resumed
    Resumed,
}

impl QueueEventKind {
    /// Event name as used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Retried => "retried",
            Self::Dead => "dead",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
        }
    }
}

/// An event emitted by the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Processed(Job),
    Failed { job: Job, error: String },
    Retried(Job),
    Dead { job: Job, error: String },
    Paused,
    Resumed,
}

impl QueueEvent {
    /// The kind of this event.
    pub fn kind(&self) -> QueueEventKind {
        match self {
            Self::Processed(_) => QueueEventKind::Processed,
            Self::Failed { .. } => QueueEventKind::Failed,
            Self::Retried(_) => QueueEventKind::Retried,
            Self::Dead { .. } => QueueEventKind::Dead,
            Self::Paused => QueueEventKind::Paused,
            Self::Resumed => QueueEventKind::Resumed,
        }
    }

    /// The job the event is about, if any.
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::Processed(job) | Self::Retried(job) => Some(job),
            Self::Failed { job, .. } | Self::Dead { job, .. } => Some(job),
            Self::Paused | Self::Resumed => None,
        }
    }

    /// The handler error, for failure events.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } | Self::Dead { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Receives queue events of the kinds it was registered for.
pub trait QueueObserver: Send + Sync {
    fn on_event(&self, event: &QueueEvent);
}

impl<F> QueueObserver for F
where
    F: Fn(&QueueEvent) + Send + Sync,
{
    fn on_event(&self, event: &QueueEvent) {
        self(event)
    }
}

/// Observers registered per event kind.
#[derive(Default)]
pub(crate) struct Observers {
    by_kind: DashMap<QueueEventKind, Vec<Arc<dyn QueueObserver>>>,
}

impl Observers {
    pub(crate) fn register(&self, kind: QueueEventKind, observer: Arc<dyn QueueObserver>) {
        self.by_kind.entry(kind).or_default().push(observer);
    }

    /// Notify observers. A panicking observer is logged and skipped.
    pub(crate) fn emit(&self, event: &QueueEvent) {
        // Clone out of the map so observers may register further observers.
        let observers = match self.by_kind.get(&event.kind()) {
            Some(observers) => observers.clone(),
            None => return,
        };

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
                error!(event = event.kind().as_str(), "Queue observer panicked");
            }
        }
    }
}
