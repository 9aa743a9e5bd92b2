use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use crate::services::ControllerStatus;
use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "O2 IPTV Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": ["/playlist", "/epg", "/play/:channel", "/channels", "/login"]
    }))
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    uptime: u64,
    #[serde(flatten)]
    controller: ControllerStatus,
}

/// GET /health - provider session and cache state
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let controller = state.controller.lock().await.status();

    // Serving still works from the stored session until a request fails
    let status = if controller.authenticated && controller.channels > 0 {
        "ok"
    } else if controller.authenticated {
        "degraded"
    } else {
        "unauthenticated"
    };

    Json(HealthResponse {
        status: status.to_string(),
        uptime,
        controller,
    })
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}

/// Liveness probe
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}
