//! Steering health endpoint (default port 9102).
//!
//! Same contract as the autorate endpoint: `/health` and `/` serve a
//! JSON snapshot, 200 healthy / 503 degraded, JSON 404 elsewhere, and a
//! bind failure never stops the daemon.

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

/// Snapshot refreshed by the steering loop each cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SteeringHealthSnapshot {
    pub consecutive_failures: u32,
    pub primary_wan: String,
    pub secondary_wan: String,
    pub fsm_state: String,
    pub steering_enabled: bool,
    pub score: u8,
    pub contributors: Vec<String>,
    pub dry_run: bool,
    pub flap_penalized: bool,
    pub baseline_rtt_ms: f64,
    pub rtt_delta_ewma_ms: f64,
}

/// Shared state between the loop and the HTTP server.
#[derive(Debug)]
pub struct HealthState {
    started: Instant,
    snapshot: RwLock<SteeringHealthSnapshot>,
}

impl HealthState {
    pub fn new() -> Arc<HealthState> {
        Arc::new(HealthState {
            started: Instant::now(),
            snapshot: RwLock::new(SteeringHealthSnapshot::default()),
        })
    }

    pub fn publish(&self, snapshot: SteeringHealthSnapshot) {
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = snapshot;
        }
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
            "steering": snapshot,
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

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(health_handler))
        .fallback(not_found)
        .with_state(state)
}

/// Serve until shutdown; bind failure is logged and non-fatal.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_at_three_failures() {
        let state = HealthState::new();
        state.publish(SteeringHealthSnapshot {
            consecutive_failures: 3,
            fsm_state: "PRIMARY_DEGRADED".into(),
            steering_enabled: true,
            ..Default::default()
        });
        let (status, body) = state.payload();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["steering"]["steering_enabled"], true);
    }

    #[test]
    fn healthy_payload_carries_fsm_state() {
        let state = HealthState::new();
        state.publish(SteeringHealthSnapshot {
            primary_wan: "spectrum".into(),
            secondary_wan: "att".into(),
            fsm_state: "PRIMARY_GOOD".into(),
            score: 15,
            contributors: vec!["SUSTAINED_YELLOW".into()],
            ..Default::default()
        });
        let (status, body) = state.payload();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["steering"]["fsm_state"], "PRIMARY_GOOD");
        assert_eq!(body["steering"]["score"], 15);
        assert_eq!(body["steering"]["contributors"][0], "SUSTAINED_YELLOW");
    }
}
