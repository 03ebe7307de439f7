//! Counters for failures that degrade to a no-op.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Failure {
    /// The other context was gone or did not answer.
    Messaging,
    /// The page agent could not be injected into a tab.
    Injection,
    /// A desktop notification could not be shown.
    Notification,
    /// A key-value store read or write failed.
    Store,
    /// A state transition was refused, e.g. switching kind while running.
    Rejected,
}

impl Failure {
    fn index(self) -> usize {
        match self {
            Self::Messaging => 0,
            Self::Injection => 1,
            Self::Notification => 2,
            Self::Store => 3,
            Self::Rejected => 4,
        }
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    counters: [AtomicU64; 5],
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: Failure, detail: impl fmt::Display) {
        self.counters[failure.index()].fetch_add(1, Ordering::Relaxed);
        debug!(?failure, %detail, "degraded to no-op");
    }

    pub fn count(&self, failure: Failure) -> u64 {
        self.counters[failure.index()].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_kept_per_failure_class() {
        let diagnostics = Diagnostics::new();
        diagnostics.record(Failure::Injection, "chrome://settings");
        diagnostics.record(Failure::Injection, "no host attached");
        diagnostics.record(Failure::Messaging, "popup closed");

        assert_eq!(diagnostics.count(Failure::Injection), 2);
        assert_eq!(diagnostics.count(Failure::Messaging), 1);
        assert_eq!(diagnostics.count(Failure::Store), 0);
    }
}
