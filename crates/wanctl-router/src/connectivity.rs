//! Router connectivity tracking.
//!
//! The control loops record every router call outcome here so outages
//! can be detected mid-cycle and reported on the health endpoint.
//! Success zeroes the counter; failure classifies and increments.

use std::time::Instant;

use crate::error::{FailureKind, RouterError};

/// Connectivity state for one router client.
#[derive(Debug)]
pub struct RouterConnectivity {
    consecutive_failures: u32,
    last_failure_kind: Option<FailureKind>,
    last_failure_at: Option<Instant>,
    is_reachable: bool,
}

impl Default for RouterConnectivity {
    fn default() -> Self {
        RouterConnectivity {
            consecutive_failures: 0,
            last_failure_kind: None,
            last_failure_at: None,
            is_reachable: true,
        }
    }
}

impl RouterConnectivity {
    pub fn new() -> RouterConnectivity {
        RouterConnectivity::default()
    }

    /// Record a successful router call, logging recovery if applicable.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            tracing::info!(
                failures = self.consecutive_failures,
                "router reconnected after consecutive failures"
            );
        }
        self.consecutive_failures = 0;
        self.last_failure_kind = None;
        self.last_failure_at = None;
        self.is_reachable = true;
    }

    /// Record a failed router call; returns its classification.
    pub fn record_failure(&mut self, error: &RouterError) -> FailureKind {
        let kind = error.kind();
        self.consecutive_failures += 1;
        self.last_failure_kind = Some(kind);
        self.last_failure_at = Some(Instant::now());
        self.is_reachable = false;
        kind
    }

    pub fn is_reachable(&self) -> bool {
        self.is_reachable
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure_kind(&self) -> Option<FailureKind> {
        self.last_failure_kind
    }

    /// Seconds since the most recent failure, if any.
    pub fn seconds_since_last_failure(&self) -> Option<f64> {
        self.last_failure_at.map(|t| t.elapsed().as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timeout_error() -> RouterError {
        RouterError::Timeout {
            timeout: Duration::from_secs(15),
        }
    }

    #[test]
    fn starts_reachable() {
        let state = RouterConnectivity::new();
        assert!(state.is_reachable());
        assert_eq!(state.consecutive_failures(), 0);
    }

    #[test]
    fn failures_accumulate_and_classify() {
        let mut state = RouterConnectivity::new();
        let kind = state.record_failure(&timeout_error());
        state.record_failure(&timeout_error());

        assert_eq!(kind, FailureKind::Timeout);
        assert_eq!(state.consecutive_failures(), 2);
        assert!(!state.is_reachable());
        assert_eq!(state.last_failure_kind(), Some(FailureKind::Timeout));
        assert!(state.seconds_since_last_failure().is_some());
    }

    #[test]
    fn success_resets_everything() {
        let mut state = RouterConnectivity::new();
        state.record_failure(&timeout_error());
        state.record_failure(&timeout_error());
        state.record_success();

        assert!(state.is_reachable());
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.last_failure_kind(), None);
        assert_eq!(state.seconds_since_last_failure(), None);
    }
}
