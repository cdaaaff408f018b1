//! Types exchanged between the actors and their handles

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of one sensor runtime
///
/// ```text
/// Idle ──tick──► Acquiring ──ok──► Publishing ──► Idle
///                    │
///                    └──error──► Idle
///
/// any state ──shutdown──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Idle,
    Acquiring,
    Publishing,
    Stopped,
}

/// An alert published for one violating measurement
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub topic: String,
    pub text: String,
}

/// Counters kept by the alert evaluator
#[derive(Debug, Default)]
pub struct EvaluatorStats {
    received: AtomicU64,
    alerts: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`EvaluatorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluatorSnapshot {
    /// Messages handed to the evaluator
    pub received: u64,

    /// Alerts published
    pub alerts: u64,

    /// Messages dropped because they could not be decoded or routed
    pub dropped: u64,

    /// Messages that hit a configuration, dispatch or publish error
    pub failed: u64,
}

impl EvaluatorStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_alert(&self) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EvaluatorSnapshot {
        EvaluatorSnapshot {
            received: self.received.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
