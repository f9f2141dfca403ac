//! SSH transport to RouterOS.
//!
//! Commands run through the system `ssh` binary with key auth and
//! BatchMode (no prompts, ever). Every invocation is bounded by a
//! wall-clock timeout; the child is killed on expiry.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::RouterError;
use crate::timeouts;

/// One SSH endpoint on the router.
#[derive(Debug, Clone)]
pub struct RouterOsSsh {
    host: String,
    user: String,
    ssh_key: PathBuf,
    command_timeout: Duration,
    connect_timeout: Duration,
}

impl RouterOsSsh {
    pub fn new(host: &str, user: &str, ssh_key: PathBuf, command_timeout: Duration) -> RouterOsSsh {
        RouterOsSsh {
            host: host.to_string(),
            user: user.to_string(),
            ssh_key,
            command_timeout,
            connect_timeout: timeouts::CONNECT,
        }
    }

    /// Run one RouterOS command, returning stdout on success.
    pub async fn run(&self, router_cmd: &str) -> Result<String, RouterError> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-i")
            .arg(&self.ssh_key)
            .arg(format!("{}@{}", self.user, self.host))
            .arg(router_cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!(host = %self.host, command = router_cmd, "ssh exec");

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| RouterError::Timeout {
                timeout: self.command_timeout,
            })??;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(RouterError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr,
            })
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}
