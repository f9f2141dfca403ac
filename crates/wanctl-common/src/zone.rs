//! Congestion zone model.
//!
//! Four ordered zones drive both daemons: the autorate controller picks a
//! rate action per zone, the steering scorer feeds zones into its
//! confidence calculation. Ordering matters — `GREEN < YELLOW < SOFT_RED
//! < RED` — so escalation can be expressed with `max()`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified congestion level for one WAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    /// Healthy — no congestion signals.
    Green,
    /// Early warning — elevated delta or rising queue.
    Yellow,
    /// Confirmed-but-mild congestion; acts only after a sustained streak.
    SoftRed,
    /// Critical — acted on from a single sample.
    Red,
}

impl Zone {
    /// Encoding used for the `wanctl_state` metric.
    pub fn metric_value(self) -> f64 {
        match self {
            Zone::Green => 0.0,
            Zone::Yellow => 1.0,
            Zone::SoftRed => 2.0,
            Zone::Red => 3.0,
        }
    }

    /// Canonical uppercase name, as persisted in state files and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Zone::Green => "GREEN",
            Zone::Yellow => "YELLOW",
            Zone::SoftRed => "SOFT_RED",
            Zone::Red => "RED",
        }
    }

    /// Parse the canonical name back; tolerant of case.
    pub fn parse(s: &str) -> Option<Zone> {
        match s.to_ascii_uppercase().as_str() {
            "GREEN" => Some(Zone::Green),
            "YELLOW" => Some(Zone::Yellow),
            "SOFT_RED" => Some(Zone::SoftRed),
            "RED" => Some(Zone::Red),
            _ => None,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
