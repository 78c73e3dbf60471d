//! Metrics handlers

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::AppState;
use searchsphere_common::metrics::MetricsSnapshot;

/// Rolling latency percentiles and the last evaluation result
pub async fn rolling(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Prometheus exposition
pub async fn prometheus(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "Prometheus recorder not installed").into_response(),
    }
}
