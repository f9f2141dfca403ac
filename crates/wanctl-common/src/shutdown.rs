//! Process-wide shutdown signal.
//!
//! SIGINT and SIGTERM set a single watch value; every suspension point in
//! the daemons waits on it so the process exits within one cycle. The
//! receiving side is cheap to clone into background tasks.

use std::time::Duration;

use tokio::sync::watch;

/// Cloneable shutdown handle.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Install SIGINT/SIGTERM listeners and return the handle.
    pub fn install() -> Shutdown {
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to install SIGTERM handler");
                        return;
                    }
                };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, shutting down");
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                }
            }
            let _ = tx.send(true);
        });

        Shutdown { rx }
    }

    /// Handle that never fires; for `oneshot` runs and tests.
    pub fn never() -> Shutdown {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes.
        std::mem::forget(tx);
        Shutdown { rx }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`, returning early (true) on shutdown.
    ///
    /// This is the interruptible wait every loop uses instead of a plain
    /// sleep so termination is bounded by one cycle interval.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.rx.changed() => {
                changed.is_ok() && *self.rx.borrow()
            }
        }
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&mut self) {
        while !self.is_shutdown() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Test-only trigger paired with a [`Shutdown`] handle.
pub fn manual() -> (watch::Sender<bool>, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (tx, Shutdown { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_runs_to_completion_without_signal() {
        let (_tx, mut shutdown) = manual();
        let interrupted = shutdown.sleep(Duration::from_millis(5)).await;
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn sleep_returns_early_on_shutdown() {
        let (tx, mut shutdown) = manual();
        let waiter = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(60)).await });
        tx.send(true).unwrap();
        let interrupted = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(interrupted);
    }

    #[tokio::test]
    async fn is_shutdown_reflects_signal() {
        let (tx, shutdown) = manual();
        assert!(!shutdown.is_shutdown());
        tx.send(true).unwrap();
        assert!(shutdown.is_shutdown());
    }
}
