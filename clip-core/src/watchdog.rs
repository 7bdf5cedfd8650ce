//! Staleness check for the inbound listener.

use std::time::{Duration, Instant};

/// Default period between watchdog checks.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// Default heartbeat age after which the listener counts as stalled.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Result of a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Heartbeat is recent.
    Healthy,
    /// No heartbeat for `silent_for`.
    Stale {
        /// Age of the last heartbeat.
        silent_for: Duration,
    },
}

/// Decides whether the listener has gone quiet.
#[derive(Debug, Clone, Copy)]
pub struct ListenerWatchdog {
    stale_after: Duration,
}

impl ListenerWatchdog {
    /// Create a watchdog with the given staleness threshold.
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    /// Compare the last heartbeat against `now`.
    pub fn check(&self, last_beat: Instant, now: Instant) -> WatchdogVerdict {
        let silent_for = now.saturating_duration_since(last_beat);
        if silent_for > self.stale_after {
            WatchdogVerdict::Stale { silent_for }
        } else {
            WatchdogVerdict::Healthy
        }
    }

    /// The configured threshold.
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }
}

impl Default for ListenerWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}
