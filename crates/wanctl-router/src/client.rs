//! The narrow command surface the daemons issue.
//!
//! Every operation funnels through one SSH transport and the shared
//! retry policy. Callers treat the client as the router: they never see
//! transports, only classified errors.

use std::path::PathBuf;
use std::time::Duration;

use wanctl_common::sample::QueueStats;

use crate::error::RouterError;
use crate::parse;
use crate::retry::{with_retry, RetryPolicy};
use crate::ssh::RouterOsSsh;

/// Router command client shared by one daemon.
#[derive(Debug, Clone)]
pub struct RouterClient {
    ssh: RouterOsSsh,
    retry: RetryPolicy,
}

impl RouterClient {
    pub fn new(
        host: &str,
        user: &str,
        ssh_key: PathBuf,
        command_timeout: Duration,
    ) -> RouterClient {
        RouterClient {
            ssh: RouterOsSsh::new(host, user, ssh_key, command_timeout),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> RouterClient {
        self.retry = retry;
        self
    }

    /// Set the max-limit on a shaper queue, in bits per second.
    pub async fn set_max_limit(&self, queue_name: &str, bps: u64) -> Result<(), RouterError> {
        let cmd = format!("/queue/tree/set [find name=\"{queue_name}\"] max-limit={bps}");
        with_retry(&self.retry, "set_max_limit", || self.ssh.run(&cmd)).await?;
        tracing::debug!(queue = queue_name, bps, "max-limit set");
        Ok(())
    }

    /// Read the current max-limit of a shaper queue, in bits per second.
    pub async fn get_max_limit(&self, queue_name: &str) -> Result<u64, RouterError> {
        let cmd = format!("/queue/tree/print detail where name=\"{queue_name}\"");
        let out = with_retry(&self.retry, "get_max_limit", || self.ssh.run(&cmd)).await?;
        parse::parse_max_limit(&out)
            .ok_or_else(|| RouterError::Parse(format!("no max-limit for queue {queue_name}")))
    }

    /// Read cumulative and instantaneous counters for a shaper queue.
    pub async fn get_queue_stats(&self, queue_name: &str) -> Result<QueueStats, RouterError> {
        let cmd = format!("/queue/tree/print stats detail where name=\"{queue_name}\"");
        let out = with_retry(&self.retry, "get_queue_stats", || self.ssh.run(&cmd)).await?;
        if !out.contains('=') {
            return Err(RouterError::Parse(format!(
                "empty stats output for queue {queue_name}"
            )));
        }
        Ok(parse::parse_queue_stats(&out))
    }

    /// Zero the cumulative counters of a shaper queue.
    pub async fn reset_queue_counters(&self, queue_name: &str) -> Result<(), RouterError> {
        let cmd = format!("/queue/tree/reset-counters [find name=\"{queue_name}\"]");
        with_retry(&self.retry, "reset_queue_counters", || self.ssh.run(&cmd)).await?;
        tracing::debug!(queue = queue_name, "queue counters reset");
        Ok(())
    }

    /// Enable the mangle rule identified by its comment.
    pub async fn enable_rule(&self, comment: &str) -> Result<(), RouterError> {
        let cmd = format!("/ip/firewall/mangle/enable [find comment=\"{comment}\"]");
        with_retry(&self.retry, "enable_rule", || self.ssh.run(&cmd)).await?;
        tracing::info!(comment, "mangle rule enabled");
        Ok(())
    }

    /// Disable the mangle rule identified by its comment.
    pub async fn disable_rule(&self, comment: &str) -> Result<(), RouterError> {
        let cmd = format!("/ip/firewall/mangle/disable [find comment=\"{comment}\"]");
        with_retry(&self.retry, "disable_rule", || self.ssh.run(&cmd)).await?;
        tracing::info!(comment, "mangle rule disabled");
        Ok(())
    }

    /// Whether the mangle rule identified by its comment is enabled.
    pub async fn is_rule_enabled(&self, comment: &str) -> Result<bool, RouterError> {
        let cmd = format!("/ip/firewall/mangle/print where comment=\"{comment}\"");
        let out = with_retry(&self.retry, "is_rule_enabled", || self.ssh.run(&cmd)).await?;
        parse::parse_rule_enabled(&out)
            .ok_or_else(|| RouterError::Parse(format!("mangle rule not found: {comment}")))
    }

    /// Liveness probe; true when the router answers an identity read.
    pub async fn test_connection(&self) -> bool {
        with_retry(&self.retry, "test_connection", || {
            self.ssh.run("/system/identity/print")
        })
        .await
        .is_ok()
    }

    pub fn host(&self) -> &str {
        self.ssh.host()
    }
}
