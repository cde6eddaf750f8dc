//! Sliding-window rate estimation
//!
//! Counts timestamps inside a trailing window, discarding old entries
//! lazily on reads and periodically on writes. Used to spot hosts
//! emitting ARP probes faster than any normal stack would.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Flush the backlog every this many inserts.
const FLUSH_STRIDE: usize = 50;

/// Counter over a trailing time window.
pub struct Window {
    size: Duration,
    entries: Mutex<Vec<Instant>>,
}

impl Window {
    pub fn new(size: Duration) -> Self {
        Self {
            size,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Record one occurrence at `ts`.
    pub fn add(&self, ts: Instant) {
        let mut entries = self.entries.lock();
        entries.push(ts);
        if entries.len() % FLUSH_STRIDE == 0 {
            Self::flush(&mut entries, self.size, Instant::now());
        }
    }

    /// Number of entries strictly newer than `now - size`.
    pub fn count(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::flush(&mut entries, self.size, Instant::now());
        entries.len()
    }

    /// Current rate in events per second.
    pub fn freq(&self) -> f64 {
        self.count() as f64 / self.size.as_secs_f64()
    }

    fn flush(entries: &mut Vec<Instant>, size: Duration, now: Instant) {
        // If the clock is younger than the window, nothing can be stale.
        let Some(cut) = now.checked_sub(size) else {
            return;
        };
        // Entries arrive in timestamp order.
        let idx = entries.partition_point(|&ts| ts <= cut);
        entries.drain(..idx);
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("size", &self.size)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}
