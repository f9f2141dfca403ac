//! Pending rate buffer for router-outage resilience.
//!
//! When the router is unreachable or the rate limiter says no, the last
//! computed `(download, upload)` pair parks here instead of being
//! discarded — shaper limits are never silently relaxed on error. The
//! slot holds only the most recent pair; old intentions are obsolete
//! the moment a newer computation lands.

use std::time::{Duration, Instant};

/// Single-slot pending rate pair with a monotonic queue timestamp.
#[derive(Debug, Default)]
pub struct PendingRateChange {
    slot: Option<PendingSlot>,
}

#[derive(Debug, Clone, Copy)]
struct PendingSlot {
    download_bps: u64,
    upload_bps: u64,
    queued_at: Instant,
}

impl PendingRateChange {
    pub fn new() -> PendingRateChange {
        PendingRateChange::default()
    }

    /// Queue a pair, overwriting any previous pending pair.
    pub fn queue(&mut self, download_bps: u64, upload_bps: u64) {
        self.queue_at(download_bps, upload_bps, Instant::now());
    }

    pub fn queue_at(&mut self, download_bps: u64, upload_bps: u64, now: Instant) {
        self.slot = Some(PendingSlot {
            download_bps,
            upload_bps,
            queued_at: now,
        });
    }

    /// Clear after a successful application.
    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn has_pending(&self) -> bool {
        self.slot.is_some()
    }

    /// The pending pair, if any.
    pub fn pending(&self) -> Option<(u64, u64)> {
        self.slot.map(|s| (s.download_bps, s.upload_bps))
    }

    /// Age of the pending pair in seconds.
    pub fn age(&self) -> Option<Duration> {
        self.age_at(Instant::now())
    }

    pub fn age_at(&self, now: Instant) -> Option<Duration> {
        self.slot.map(|s| now.saturating_duration_since(s.queued_at))
    }

    /// Whether the pending pair is too old to apply safely.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.is_stale_at(max_age, Instant::now())
    }

    pub fn is_stale_at(&self, max_age: Duration, now: Instant) -> bool {
        match self.age_at(now) {
            Some(age) => age > max_age,
            None => false,
        }
    }
}
