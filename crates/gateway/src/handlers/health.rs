//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::AppState;
use searchsphere_common::errors::Result;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: CheckResult,
    pub embedder: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

async fn check(call: impl Future<Output = Result<()>>) -> CheckResult {
    let start = Instant::now();
    match call.await {
        Ok(()) => CheckResult {
            ok: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
            model: None,
        },
        Err(e) => CheckResult {
            ok: false,
            latency_ms: None,
            error: Some(e.to_string()),
            model: None,
        },
    }
}

/// Backend and embedder reachability; always 200 so the body can be read
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let retriever = &state.retriever;
    let (backend, mut embedder) = tokio::join!(
        check(retriever.check_backend()),
        check(retriever.check_embedder())
    );
    embedder.model = Some(retriever.embedding_model().to_string());

    let status = if backend.ok && embedder.ok { "ok" } else { "degraded" };
    if !backend.ok {
        tracing::warn!(error = ?backend.error, "Health check: search backend down");
    }

    Json(HealthResponse {
        status,
        version: searchsphere_common::VERSION,
        backend,
        embedder,
    })
}
