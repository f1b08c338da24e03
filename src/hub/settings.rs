//! Runtime-adjustable timing and size limits
//!
//! Each value lives in its own atomic: pumps read them on every cycle while
//! an operator may change them at any time, and no reader ever waits.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::HubConfig;

/// Longest wait accepted by the setters, keeps deadline arithmetic in range.
pub const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Floor for the ping interval; tickers cannot run with a zero period.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct HubSettings {
    write_wait_nanos: AtomicU64,
    pong_wait_nanos: AtomicU64,
    ping_interval_nanos: AtomicU64,
    read_limit: AtomicUsize,
}

impl HubSettings {
    pub fn new(config: &HubConfig) -> Self {
        let settings = Self {
            write_wait_nanos: AtomicU64::new(0),
            pong_wait_nanos: AtomicU64::new(0),
            ping_interval_nanos: AtomicU64::new(0),
            read_limit: AtomicUsize::new(0),
        };

        settings.set_write_wait(config.write_wait);
        settings.set_pong_wait(config.pong_wait);
        settings.set_read_limit(config.read_limit);
        settings
    }

    /// Set the deadline applied to every transport write.
    pub fn set_write_wait(&self, d: Duration) {
        store(&self.write_wait_nanos, d);
    }

    /// Set the pong wait; the ping interval follows at nine tenths of it so a
    /// ping always goes out before the peer's read deadline lapses.
    pub fn set_pong_wait(&self, d: Duration) {
        let d = d.min(MAX_WAIT);
        store(&self.pong_wait_nanos, d);
        store(&self.ping_interval_nanos, (d * 9 / 10).max(MIN_PING_INTERVAL));
    }

    /// Set the largest inbound message accepted, in bytes.
    pub fn set_read_limit(&self, size: usize) {
        self.read_limit.store(size, Ordering::Relaxed);
    }

    pub fn write_wait(&self) -> Duration {
        load(&self.write_wait_nanos)
    }

    pub fn pong_wait(&self) -> Duration {
        load(&self.pong_wait_nanos)
    }

    pub fn ping_interval(&self) -> Duration {
        load(&self.ping_interval_nanos)
    }

    pub fn read_limit(&self) -> usize {
        self.read_limit.load(Ordering::Relaxed)
    }

    /// Deadline for a write starting now
    pub fn write_deadline(&self) -> Instant {
        Instant::now() + self.write_wait()
    }

    /// Deadline for the next pong, counted from now
    pub fn read_deadline(&self) -> Instant {
        Instant::now() + self.pong_wait()
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::new(&HubConfig::default())
    }
}

fn store(slot: &AtomicU64, d: Duration) {
    slot.store(d.min(MAX_WAIT).as_nanos() as u64, Ordering::Relaxed);
}

fn load(slot: &AtomicU64) -> Duration {
    Duration::from_nanos(slot.load(Ordering::Relaxed))
}
