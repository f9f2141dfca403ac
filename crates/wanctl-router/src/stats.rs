//! Queue statistics delta engine.
//!
//! The shaper counters are cumulative; the control loops want per-cycle
//! deltas. The reader remembers the previous sample per queue and
//! diffs. A counter regression (router reboot, queue recreated) means
//! the baseline is gone — re-baseline and log rather than emit a bogus
//! huge delta.

use std::collections::HashMap;

use wanctl_common::sample::{QueueDelta, QueueStats};

use crate::client::RouterClient;
use crate::error::RouterError;

/// Per-queue delta reader over one router client.
#[derive(Debug)]
pub struct QueueStatsReader {
    previous: HashMap<String, QueueStats>,
}

impl Default for QueueStatsReader {
    fn default() -> Self {
        QueueStatsReader {
            previous: HashMap::new(),
        }
    }
}

impl QueueStatsReader {
    pub fn new() -> QueueStatsReader {
        QueueStatsReader::default()
    }

    /// Read current counters and return the delta since the last read.
    ///
    /// The first read after startup returns the raw counters and stores
    /// them as the baseline.
    pub async fn read_delta(
        &mut self,
        client: &RouterClient,
        queue_name: &str,
    ) -> Result<QueueDelta, RouterError> {
        let current = client.get_queue_stats(queue_name).await?;
        Ok(self.apply(queue_name, current))
    }

    /// Pure delta step against the remembered baseline; separated from
    /// the network read so it can be tested without a router.
    pub fn apply(&mut self, queue_name: &str, current: QueueStats) -> QueueDelta {
        let delta = match self.previous.get(queue_name) {
            None => {
                tracing::debug!(queue = queue_name, "first stats read, storing baseline");
                QueueDelta {
                    packets: current.packets,
                    bytes: current.bytes,
                    dropped: current.dropped,
                    queued_packets: current.queued_packets,
                    queued_bytes: current.queued_bytes,
                }
            }
            Some(previous) if current.packets < previous.packets => {
                tracing::warn!(
                    queue = queue_name,
                    previous_packets = previous.packets,
                    current_packets = current.packets,
                    "counter regression, re-baselining"
                );
                QueueDelta {
                    queued_packets: current.queued_packets,
                    queued_bytes: current.queued_bytes,
                    ..Default::default()
                }
            }
            Some(previous) => QueueDelta {
                packets: current.packets - previous.packets,
                bytes: current.bytes.saturating_sub(previous.bytes),
                dropped: current.dropped.saturating_sub(previous.dropped),
                queued_packets: current.queued_packets,
                queued_bytes: current.queued_bytes,
            },
        };
        self.previous.insert(queue_name.to_string(), current);
        delta
    }

    /// Forget a queue's baseline (after an explicit counter reset).
    pub fn forget(&mut self, queue_name: &str) {
        self.previous.remove(queue_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(packets: u64, bytes: u64, dropped: u64, queued: u64) -> QueueStats {
        QueueStats {
            packets,
            bytes,
            dropped,
            queued_packets: queued,
            queued_bytes: queued * 1500,
        }
    }

    #[test]
    fn first_read_returns_raw_counters() {
        let mut reader = QueueStatsReader::new();
        let delta = reader.apply("dl", stats(1000, 1_500_000, 5, 2));
        assert_eq!(delta.packets, 1000);
        assert_eq!(delta.dropped, 5);
        assert_eq!(delta.queued_packets, 2);
    }

    #[test]
    fn second_read_diffs_cumulative_keeps_instantaneous() {
        let mut reader = QueueStatsReader::new();
        reader.apply("dl", stats(1000, 1_500_000, 5, 2));
        let delta = reader.apply("dl", stats(1400, 2_100_000, 8, 7));
        assert_eq!(delta.packets, 400);
        assert_eq!(delta.bytes, 600_000);
        assert_eq!(delta.dropped, 3);
        assert_eq!(delta.queued_packets, 7, "queue depth is not diffed");
    }

    #[test]
    fn regression_rebaselines_with_zero_deltas() {
        let mut reader = QueueStatsReader::new();
        reader.apply("dl", stats(1_000_000, 9_999_999, 50, 0));
        // Router rebooted: counters restart from near zero.
        let delta = reader.apply("dl", stats(120, 80_000, 0, 3));
        assert_eq!(delta.packets, 0);
        assert_eq!(delta.dropped, 0);
        assert_eq!(delta.queued_packets, 3);

        // Next read diffs against the new baseline.
        let delta = reader.apply("dl", stats(220, 160_000, 1, 0));
        assert_eq!(delta.packets, 100);
        assert_eq!(delta.dropped, 1);
    }

    #[test]
    fn queues_are_independent() {
        let mut reader = QueueStatsReader::new();
        reader.apply("dl", stats(100, 1000, 0, 0));
        let first_ul = reader.apply("ul", stats(9000, 90_000, 2, 1));
        assert_eq!(first_ul.packets, 9000, "first read per queue is raw");
        let dl = reader.apply("dl", stats(150, 1500, 0, 0));
        assert_eq!(dl.packets, 50);
    }

    #[test]
    fn forget_restores_first_read_semantics() {
        let mut reader = QueueStatsReader::new();
        reader.apply("dl", stats(100, 1000, 0, 0));
        reader.forget("dl");
        let delta = reader.apply("dl", stats(5, 50, 0, 0));
        assert_eq!(delta.packets, 5);
    }
}
