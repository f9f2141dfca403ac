//! Router failure model.
//!
//! Failures carry two orthogonal facts: a closed classification (what
//! went wrong, for connectivity tracking and health reporting) and
//! retryability (whether backoff-and-retry is worth it). Auth and
//! command-syntax failures are never retried.

use std::fmt;
use std::time::Duration;

/// Closed classification of router communication failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    ConnectionRefused,
    NetworkUnreachable,
    DnsFailure,
    AuthFailure,
    Unknown,
}

impl FailureKind {
    /// Snake-case name used in logs and the health endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionRefused => "connection_refused",
            FailureKind::NetworkUnreachable => "network_unreachable",
            FailureKind::DnsFailure => "dns_failure",
            FailureKind::AuthFailure => "auth_failure",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Classify freeform error text (ssh stderr, OS error strings).
    pub fn from_message(message: &str) -> FailureKind {
        let m = message.to_ascii_lowercase();
        if m.contains("timed out") || m.contains("timeout") {
            FailureKind::Timeout
        } else if m.contains("connection refused") {
            FailureKind::ConnectionRefused
        } else if m.contains("network is unreachable") || m.contains("no route to host") {
            FailureKind::NetworkUnreachable
        } else if m.contains("name or service not known")
            || m.contains("could not resolve")
            || m.contains("temporary failure in name resolution")
        {
            FailureKind::DnsFailure
        } else if m.contains("permission denied")
            || m.contains("authentication failed")
            || m.contains("host key verification failed")
        {
            FailureKind::AuthFailure
        } else {
            FailureKind::Unknown
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed router operation.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("unparseable router output: {0}")]
    Parse(String),
}

impl RouterError {
    /// Classification for connectivity tracking.
    pub fn kind(&self) -> FailureKind {
        match self {
            RouterError::Timeout { .. } => FailureKind::Timeout,
            RouterError::CommandFailed { stderr, .. } => FailureKind::from_message(stderr),
            RouterError::Transport(e) => match e.kind() {
                std::io::ErrorKind::TimedOut => FailureKind::Timeout,
                std::io::ErrorKind::ConnectionRefused => FailureKind::ConnectionRefused,
                _ => FailureKind::from_message(&e.to_string()),
            },
            RouterError::Parse(_) => FailureKind::Unknown,
        }
    }

    /// Whether backoff-and-retry can plausibly help.
    ///
    /// Connection resets and broken pipes classify as `unknown` but are
    /// still transient, so retryability is decided on the message, not
    /// the kind.
    pub fn is_retryable(&self) -> bool {
        match self {
            RouterError::Timeout { .. } => true,
            RouterError::CommandFailed { stderr, .. } => is_transient_message(stderr),
            RouterError::Transport(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe => true,
                _ => is_transient_message(&e.to_string()),
            },
            RouterError::Parse(_) => false,
        }
    }
}

fn is_transient_message(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    [
        "connection refused",
        "connection timed out",
        "connection reset",
        "broken pipe",
        "network is unreachable",
    ]
    .iter()
    .any(|needle| m.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_ssh_failures() {
        assert_eq!(
            FailureKind::from_message("ssh: connect to host 10.0.0.1 port 22: Connection refused"),
            FailureKind::ConnectionRefused
        );
        assert_eq!(
            FailureKind::from_message("connect to host router port 22: Network is unreachable"),
            FailureKind::NetworkUnreachable
        );
        assert_eq!(
            FailureKind::from_message("ssh: Could not resolve hostname router.lan"),
            FailureKind::DnsFailure
        );
        assert_eq!(
            FailureKind::from_message("admin@10.0.0.1: Permission denied (publickey)"),
            FailureKind::AuthFailure
        );
        assert_eq!(FailureKind::from_message("weird garbage"), FailureKind::Unknown);
    }

    #[test]
    fn timeout_is_retryable() {
        let err = RouterError::Timeout {
            timeout: Duration::from_secs(15),
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[test]
    fn auth_failure_is_not_retryable() {
        let err = RouterError::CommandFailed {
            status: 255,
            stderr: "Permission denied (publickey)".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), FailureKind::AuthFailure);
    }

    #[test]
    fn reset_is_retryable_but_classifies_unknown() {
        let err = RouterError::CommandFailed {
            status: 255,
            stderr: "Connection reset by peer".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), FailureKind::Unknown);
    }

    #[test]
    fn parse_errors_are_fatal_for_the_cycle() {
        let err = RouterError::Parse("no max-limit field".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), FailureKind::Unknown);
    }
}
