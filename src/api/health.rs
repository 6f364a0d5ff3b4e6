use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub service: &'static str,
    pub status: &'static str,
    pub uptime: u64,
    pub version: &'static str,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "verdict",
        status: "ok",
        uptime: state.metrics.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
