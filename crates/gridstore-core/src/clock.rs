//! Monotonic modification timestamps.
//!
//! Replication orders writes by a single `u64` timestamp: wall-clock
//! milliseconds, bumped whenever the wall clock stalls or runs backwards so
//! that two local writes never share a timestamp. Remote timestamps observed
//! during replication advance the clock so later local writes supersede them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A strictly increasing wall-clock millisecond source.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    /// Create a clock starting at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(current_time_ms()),
        }
    }

    /// Generate a timestamp for a local modification.
    ///
    /// Guaranteed greater than any timestamp previously returned by `tick`
    /// or observed via [`MonotonicClock::observe`].
    pub fn tick(&self) -> u64 {
        let now = current_time_ms();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(seen) => last = seen,
            }
        }
    }

    /// Record a timestamp received from a remote node.
    ///
    /// Ensures subsequent [`MonotonicClock::tick`] calls return timestamps
    /// greater than `remote`.
    pub fn observe(&self, remote: u64) {
        self.last.fetch_max(remote, Ordering::AcqRel);
    }

    /// The highest timestamp issued or observed so far.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

fn current_time_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}
