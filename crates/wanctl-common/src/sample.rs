//! Per-cycle measurement models shared by both daemons.

use serde::{Deserialize, Serialize};

/// Where an RTT sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RttSource {
    /// Concurrent ICMP probes to the anchor hosts.
    Icmp,
    /// TCP connect-time fallback when ICMP produced no samples.
    Tcp,
    /// Last known RTT replayed inside the fallback window.
    Cache,
}

/// Cumulative shaper queue counters as read from the router.
///
/// `packets`, `bytes` and `dropped` are monotonically increasing;
/// `queued_packets`/`queued_bytes` are instantaneous depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub packets: u64,
    pub bytes: u64,
    pub dropped: u64,
    pub queued_packets: u64,
    pub queued_bytes: u64,
}

/// Per-cycle change in the cumulative counters, plus current depth.
///
/// The first read after startup carries the raw counters (no previous
/// sample to diff against); downstream logic only cares about small
/// values so this is harmless for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDelta {
    pub packets: u64,
    pub bytes: u64,
    pub dropped: u64,
    pub queued_packets: u64,
    pub queued_bytes: u64,
}

/// Everything one control-loop tick measured for one WAN.
///
/// Fields are optional because any part of the measurement can fail
/// independently; downstream logic tolerates absences.
#[derive(Debug, Clone, Default)]
pub struct CycleSample {
    /// Wall-clock timestamp of the cycle start (unix seconds).
    pub ts: i64,
    /// Aggregated RTT in milliseconds, if any probe succeeded.
    pub rtt_ms: Option<f64>,
    /// Provenance of `rtt_ms`.
    pub rtt_source: Option<RttSource>,
    /// Download-queue delta for this cycle.
    pub download: Option<QueueDelta>,
    /// Upload-queue delta for this cycle.
    pub upload: Option<QueueDelta>,
}

impl CycleSample {
    /// Total drops across both directions this cycle (0 when unknown).
    pub fn total_drops(&self) -> u64 {
        self.download.map_or(0, |d| d.dropped) + self.upload.map_or(0, |d| d.dropped)
    }

    /// Deepest instantaneous queue across both directions (0 when unknown).
    pub fn max_queued_packets(&self) -> u64 {
        self.download
            .map_or(0, |d| d.queued_packets)
            .max(self.upload.map_or(0, |d| d.queued_packets))
    }
}
