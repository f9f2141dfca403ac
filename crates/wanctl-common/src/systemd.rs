//! systemd notification side channel.
//!
//! Best-effort `sd_notify` datagrams over `$NOTIFY_SOCKET`. When the
//! socket is absent (non-systemd deployment, tests, containers) every
//! call is a silent no-op — no core logic may depend on delivery.

use std::os::unix::net::UnixDatagram;

/// Whether the process was started under a notify-capable systemd unit.
pub fn is_available() -> bool {
    std::env::var_os("NOTIFY_SOCKET").is_some()
}

fn notify(payload: &str) {
    let Some(socket_path) = std::env::var_os("NOTIFY_SOCKET") else {
        return;
    };
    let Ok(sock) = UnixDatagram::unbound() else {
        return;
    };
    // Abstract-namespace sockets start with '@' in the env var.
    let path = socket_path.to_string_lossy();
    let target: std::borrow::Cow<'_, str> = if let Some(rest) = path.strip_prefix('@') {
        format!("\0{rest}").into()
    } else {
        path
    };
    if let Err(e) = sock.send_to(payload.as_bytes(), target.as_ref()) {
        tracing::debug!(error = %e, "sd_notify send failed");
    }
}

/// `READY=1` — initialization finished.
pub fn notify_ready() {
    notify("READY=1");
}

/// `WATCHDOG=1` — fed once per healthy cycle.
pub fn notify_watchdog() {
    notify("WATCHDOG=1");
}

/// Free-form status line shown in `systemctl status`.
pub fn notify_status(status: &str) {
    notify(&format!("STATUS={status}"));
}

/// Degraded status with the standard prefix.
pub fn notify_degraded(detail: &str) {
    notify(&format!("STATUS=Degraded - {detail}"));
}

/// `STOPPING=1` — shutdown sequence started.
pub fn notify_stopping() {
    notify("STOPPING=1");
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test covers both paths: the env var is process-global, so
    // splitting these would race under the parallel test runner.
    #[test]
    fn notify_follows_socket_presence() {
        std::env::remove_var("NOTIFY_SOCKET");
        assert!(!is_available());
        // Without a socket every call must be a silent no-op.
        notify_ready();
        notify_watchdog();
        notify_status("Processing");
        notify_degraded("3 consecutive failures");
        notify_stopping();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path).unwrap();
        std::env::set_var("NOTIFY_SOCKET", &path);
        assert!(is_available());

        notify_watchdog();

        let mut buf = [0u8; 64];
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(1)))
            .unwrap();
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"WATCHDOG=1");
        std::env::remove_var("NOTIFY_SOCKET");
    }
}
