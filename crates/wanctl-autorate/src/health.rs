//! Health HTTP endpoint.
//!
//! `GET /health` (and `/`) returns a JSON snapshot of the daemon; 200
//! while healthy, 503 once the loop has failed three consecutive
//! cycles. Every other path is a JSON 404. A bind failure is logged and
//! the daemon runs on without the endpoint.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use wanctl_common::shutdown::Shutdown;

/// Consecutive failed cycles before the endpoint reports degraded.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// One direction's health view.
#[derive(Debug, Clone, Serialize)]
pub struct DirectionHealth {
    pub current_rate_mbps: f64,
    pub state: String,
}

/// One WAN's health view.
#[derive(Debug, Clone, Serialize)]
pub struct WanHealth {
    pub name: String,
    pub baseline_rtt_ms: f64,
    pub load_rtt_ms: f64,
    pub download: DirectionHealth,
    pub upload: DirectionHealth,
}

/// Snapshot refreshed by the control loop each cycle.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub consecutive_failures: u32,
    pub wans: Vec<WanHealth>,
}

/// Shared state between the control loop and the HTTP server.
#[derive(Debug)]
pub struct HealthState {
    started: Instant,
    snapshot: RwLock<HealthSnapshot>,
}

impl HealthState {
    pub fn new() -> Arc<HealthState> {
        Arc::new(HealthState {
            started: Instant::now(),
            snapshot: RwLock::new(HealthSnapshot::default()),
        })
    }

    /// Replace the published snapshot (called once per cycle).
    pub fn publish(&self, snapshot: HealthSnapshot) {
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = snapshot;
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.snapshot
            .read()
            .map(|s| s.consecutive_failures >= MAX_CONSECUTIVE_FAILURES)
            .unwrap_or(false)
    }

    fn payload(&self) -> (StatusCode, serde_json::Value) {
        let snapshot = self
            .snapshot
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        let degraded = snapshot.consecutive_failures >= MAX_CONSECUTIVE_FAILURES;

        let body = serde_json::json!({
            "status": if degraded { "degraded" } else { "healthy" },
            "uptime_seconds": (self.started.elapsed().as_secs_f64() * 10.0).round() / 10.0,
            "version": wanctl_common::VERSION,
            "consecutive_failures": snapshot.consecutive_failures,
            "wan_count": snapshot.wans.len(),
            "wans": snapshot.wans,
        });
        let status = if degraded {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        };
        (status, body)
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let (status, body) = state.payload();
    (status, Json(body))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not found"})),
    )
}

/// Build the health router (shared by both daemons).
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(health_handler))
        .fallback(not_found)
        .with_state(state)
}

/// Serve the health endpoint until shutdown. Bind failure is non-fatal.
pub async fn serve(
    state: Arc<HealthState>,
    addr: std::net::SocketAddr,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(%addr, error = %e, "health endpoint bind failed, continuing without it");
            return Ok(());
        }
    };
    tracing::info!(%addr, "health endpoint listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    Ok(())
}
