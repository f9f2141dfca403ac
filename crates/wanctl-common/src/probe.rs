//! RTT measurement.
//!
//! Each cycle fans out one ICMP probe per anchor host (the system `ping`
//! binary, one echo, per-ping timeout) and aggregates whatever came
//! back. Partial failure is not an error; total failure falls back to a
//! TCP connect-time measurement against configured `host:port` anchors.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::Command;

/// How successful probe RTTs collapse into one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Arithmetic mean.
    Average,
    /// Min of successes; biases against transient buffering.
    Minimum,
    /// Sorted middle.
    Median,
    /// Sorted middle of three; falls back to min below three samples.
    #[default]
    MedianOfThree,
}

/// Concurrent multi-host RTT probe.
#[derive(Debug, Clone)]
pub struct RttProbe {
    hosts: Vec<String>,
    timeout: Duration,
    aggregation: Aggregation,
}

impl RttProbe {
    pub fn new(hosts: Vec<String>, timeout: Duration, aggregation: Aggregation) -> RttProbe {
        RttProbe {
            hosts,
            timeout,
            aggregation,
        }
    }

    /// Probe all anchors concurrently; `None` when every probe failed.
    pub async fn measure(&self) -> Option<f64> {
        let probes = self.hosts.iter().map(|host| ping_host(host, self.timeout));
        let rtts: Vec<f64> = futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect();

        if rtts.len() < self.hosts.len() {
            tracing::debug!(
                succeeded = rtts.len(),
                total = self.hosts.len(),
                "partial ping failure"
            );
        }
        aggregate(&rtts, self.aggregation)
    }
}

/// One ICMP echo against one host; `None` on timeout or failure.
pub async fn ping_host(host: &str, timeout: Duration) -> Option<f64> {
    let timeout_s = timeout.as_secs_f64().ceil().max(1.0) as u64;
    let mut cmd = Command::new("ping");
    cmd.arg("-n")
        .arg("-c")
        .arg("1")
        .arg("-W")
        .arg(timeout_s.to_string())
        .arg(host)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    // Belt over the -W braces: the subprocess itself is bounded too.
    let output = tokio::time::timeout(timeout + Duration::from_secs(1), cmd.output())
        .await
        .ok()?
        .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_ping_rtt(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the `time=<ms>` field from iputils ping output.
pub fn parse_ping_rtt(output: &str) -> Option<f64> {
    let idx = output.find("time=")?;
    let rest = &output[idx + 5..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Collapse probe results according to the policy.
pub fn aggregate(rtts: &[f64], aggregation: Aggregation) -> Option<f64> {
    if rtts.is_empty() {
        return None;
    }
    let min = rtts.iter().cloned().fold(f64::INFINITY, f64::min);
    let value = match aggregation {
        Aggregation::Average => rtts.iter().sum::<f64>() / rtts.len() as f64,
        Aggregation::Minimum => min,
        Aggregation::Median => median(rtts),
        Aggregation::MedianOfThree => {
            if rtts.len() < 3 {
                min
            } else {
                median(rtts)
            }
        }
    };
    Some(value)
}

fn median(rtts: &[f64]) -> f64 {
    let mut sorted = rtts.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}

/// TCP connect-time fallback: race all anchors, take the fastest
/// successful handshake. `None` when nothing connected in time.
pub async fn tcp_connect_rtt(anchors: &[String], timeout: Duration) -> Option<f64> {
    let attempts = anchors.iter().map(|addr| async move {
        let start = Instant::now();
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr.as_str())).await {
            Ok(Ok(_)) => Some(start.elapsed().as_secs_f64() * 1000.0),
            _ => None,
        }
    });
    futures::future::join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .fold(None, |best: Option<f64>, rtt| match best {
            Some(b) if b <= rtt => Some(b),
            _ => Some(rtt),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_OUTPUT: &str = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.\n64 bytes from 1.1.1.1: icmp_seq=1 ttl=58 time=12.4 ms\n\n--- 1.1.1.1 ping statistics ---\n1 packets transmitted, 1 received, 0% packet loss, time 0ms\nrtt min/avg/max/mdev = 12.431/12.431/12.431/0.000 ms\n";

    #[test]
    fn parses_iputils_time_field() {
        assert_eq!(parse_ping_rtt(PING_OUTPUT), Some(12.4));
        assert_eq!(parse_ping_rtt("no time here"), None);
        assert_eq!(parse_ping_rtt("time=7 ms"), Some(7.0));
    }

    #[test]
    fn aggregate_empty_is_none() {
        assert_eq!(aggregate(&[], Aggregation::Average), None);
        assert_eq!(aggregate(&[], Aggregation::MedianOfThree), None);
    }

    #[test]
    fn aggregate_average_and_minimum() {
        let rtts = [10.0, 20.0, 30.0];
        assert_eq!(aggregate(&rtts, Aggregation::Average), Some(20.0));
        assert_eq!(aggregate(&rtts, Aggregation::Minimum), Some(10.0));
    }

    #[test]
    fn aggregate_median_takes_sorted_middle() {
        let rtts = [30.0, 10.0, 20.0];
        assert_eq!(aggregate(&rtts, Aggregation::Median), Some(20.0));
    }

    #[test]
    fn median_of_three_falls_back_to_min_below_three() {
        let two = [25.0, 15.0];
        assert_eq!(aggregate(&two, Aggregation::MedianOfThree), Some(15.0));
        let three = [25.0, 15.0, 40.0];
        assert_eq!(aggregate(&three, Aggregation::MedianOfThree), Some(25.0));
    }

    #[tokio::test]
    async fn tcp_fallback_returns_none_for_unroutable_anchor() {
        // TEST-NET-1 is guaranteed unroutable.
        let anchors = vec!["192.0.2.1:443".to_string()];
        let rtt = tcp_connect_rtt(&anchors, Duration::from_millis(100)).await;
        assert_eq!(rtt, None);
    }
}
