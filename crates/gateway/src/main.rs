//! SearchSphere API Gateway
//!
//! The HTTP entry point for the retrieval core.
//! Handles:
//! - Hybrid, lexical and vector search
//! - Offline Precision@K evaluation and label assist
//! - Health and metrics endpoints
//! - Observability (logging, request ids, Prometheus)

mod handlers;

use axum::{
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use searchsphere_common::{
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedder,
    metrics::{self, RollingMetrics},
};
use searchsphere_search::{ElasticBackend, HybridRetriever};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub retriever: Arc<HybridRetriever>,
    pub metrics: Arc<RollingMetrics>,
    pub prometheus: Option<PrometheusHandle>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::load()?);
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting SearchSphere API Gateway v{}",
        searchsphere_common::VERSION
    );

    let prometheus = if config.observability.prometheus_enabled {
        let recorder = PrometheusBuilder::new()
            .set_buckets(metrics::LATENCY_BUCKETS)
            .and_then(|builder| builder.install_recorder());
        match recorder {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Prometheus recorder not installed");
                None
            }
        }
    } else {
        None
    };
    metrics::register_metrics();

    let backend = Arc::new(ElasticBackend::new(&config.elastic)?);
    let embedder = create_embedder(&config.embedding)?;
    let rolling = Arc::new(RollingMetrics::new());
    let retriever = HybridRetriever::from_config(&config.retrieval, backend, embedder, rolling.clone());

    // Requests fail with 502 until the cluster answers; startup does not wait for it
    match retriever.check_backend().await {
        Ok(()) => info!(url = %config.elastic.url, index = %config.elastic.index, "Search backend reachable"),
        Err(e) => warn!(url = %config.elastic.url, error = %e, "Search backend not reachable yet"),
    }

    let state = AppState {
        config: config.clone(),
        retriever: Arc::new(retriever),
        metrics: rolling,
        prometheus,
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Skipping invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(allowed)
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_allow_origins);

    // API routes
    let api_routes = Router::new()
        .route("/search", post(handlers::search::search))
        .route("/eval/precision", post(handlers::eval::precision))
        .route("/eval/label-assist", post(handlers::eval::label_assist))
        .route("/metrics", get(handlers::metrics::rolling))
        .route("/healthz", get(handlers::health::healthz));

    Router::new()
        .nest("/api", api_routes)
        .route("/healthz", get(handlers::health::healthz))
        .route("/metrics", get(handlers::metrics::prometheus))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    state.config.request_timeout(),
                ))
                .layer(cors),
        )
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use searchsphere_search::testing::{hits, FailingEmbedder, FixedEmbedder, StaticBackend};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with(backend: StaticBackend, config: AppConfig) -> (Router, Arc<RollingMetrics>) {
        let rolling = Arc::new(RollingMetrics::new());
        let retriever = HybridRetriever::from_config(
            &config.retrieval,
            Arc::new(backend),
            Arc::new(FixedEmbedder::new(4)),
            rolling.clone(),
        );
        let state = AppState {
            config: Arc::new(config),
            retriever: Arc::new(retriever),
            metrics: rolling.clone(),
            prometheus: None,
        };
        (create_router(state), rolling)
    }

    fn app(backend: StaticBackend) -> Router {
        app_with(backend, AppConfig::default()).0
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, request).await
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(app, request).await
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_search_hybrid() {
        let backend = StaticBackend::new(hits(&["d1", "d2", "d3"]), hits(&["d3", "d1", "d4"]));
        let (status, body) = post_json(app(backend), "/api/search", json!({"query": "rrf", "k": 3})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "hybrid");
        let ids: Vec<_> = body["results"].as_array().unwrap().iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("d1"), json!("d3"), json!("d2")]);
        assert!(body["latency_ms"].is_number());
        assert!(body.get("warnings").is_none());
    }

    #[tokio::test]
    async fn test_search_accepts_q_alias_and_mode_alias() {
        let backend = StaticBackend::new(hits(&["a", "b"]), vec![]);
        let (status, body) = post_json(app(backend), "/api/search", json!({"q": "x", "mode": "bm25"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "lexical");
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_degraded_returns_warnings() {
        let backend = StaticBackend::new(hits(&["a"]), vec![]).failing_vector("knn exploded");
        let (status, body) = post_json(app(backend), "/api/search", json!({"query": "x"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["id"], "a");
        assert!(body["warnings"][0].as_str().unwrap().contains("knn exploded"));
    }

    #[tokio::test]
    async fn test_search_backend_unavailable_is_502() {
        let backend = StaticBackend::new(vec![], vec![]).unreachable();
        let (status, _) = post_json(app(backend), "/api/search", json!({"query": "x"})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_search_rejects_oversized_query() {
        let backend = StaticBackend::new(vec![], vec![]);
        let query = "q".repeat(5000);
        let (status, _) = post_json(app(backend), "/api/search", json!({"query": query})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_demo_fallback() {
        let mut config = AppConfig::default();
        config.retrieval.demo_fallback = true;
        let (app, _) = app_with(StaticBackend::new(vec![], vec![]), config);

        let (status, body) = post_json(app, "/api/search", json!({"query": "nothing"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "demo");
        assert_eq!(body["results"][0]["title"], "FinOps Optimization Overview");
    }

    #[tokio::test]
    async fn test_eval_precision_and_metrics_snapshot() {
        let backend = StaticBackend::new(hits(&["r1", "x"]), vec![]);
        let (app, rolling) = app_with(backend, AppConfig::default());

        let (status, body) = post_json(
            app.clone(),
            "/api/eval/precision",
            json!({"items": [{"query": "q", "relevant_ids": ["r1"]}], "k": 2}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["k"], 2);
        assert_eq!(body["precision_at_k"], 0.5);
        assert_eq!(body["queries"], 1);
        assert_eq!(rolling.snapshot().eval.runs, 1);

        let (status, body) = get_json(app, "/api/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["eval"]["k"], 2);
        assert_eq!(body["eval"]["p_at_k"], 0.5);
        assert!(body["search"]["count"].is_number());
    }

    #[tokio::test]
    async fn test_search_clamps_k_and_tolerates_unknown_mode() {
        let backend = StaticBackend::new(hits(&["a", "b", "c"]), vec![]);
        let (status, body) =
            post_json(app(backend), "/api/search", json!({"query": "x", "k": -3, "mode": "BM-25"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "hybrid");
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_eval_precision_reports_warnings_and_limits_batch() {
        let config = AppConfig::default();
        let rolling = Arc::new(RollingMetrics::new());
        let retriever = HybridRetriever::from_config(
            &config.retrieval,
            Arc::new(StaticBackend::new(hits(&["r1", "r2", "x"]), vec![])),
            Arc::new(FailingEmbedder),
            rolling.clone(),
        );
        let app = create_router(AppState {
            config: Arc::new(config),
            retriever: Arc::new(retriever),
            metrics: rolling,
            prometheus: None,
        });

        let items = json!([
            {"query": "first", "relevant_ids": ["r1", "r2"]},
            {"query": "second", "relevant_ids": []}
        ]);
        let (status, body) =
            post_json(app.clone(), "/api/eval/precision", json!({"items": items, "k": 500})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["k"], 50);
        assert_eq!(body["per_query"], json!([2.0 / 3.0, 0.0]));
        assert_eq!(body["queries"], 2);
        assert_eq!(body["warnings"].as_array().unwrap().len(), 2);
        assert!(body["warnings"][0].as_str().unwrap().starts_with("Embedding failed for 'first…'"));

        let too_many: Vec<Value> = (0..501).map(|i| json!({"query": format!("q{}", i)})).collect();
        let (status, _) = post_json(app, "/api/eval/precision", json!({"items": too_many})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_label_assist() {
        let backend = StaticBackend::new(hits(&["c1", "c2"]), hits(&["c2"]));
        let (app, rolling) = app_with(backend, AppConfig::default());

        let (status, body) =
            post_json(app, "/api/eval/label-assist", json!({"query": "leave policy"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["query"], "leave policy");
        assert_eq!(body["k"], 20);
        let chunk_ids: Vec<_> = body["candidates"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["chunk_id"].clone())
            .collect();
        assert_eq!(chunk_ids, vec![json!("c2"), json!("c1")]);
        assert_eq!(body["candidates"][0]["title"], "Untitled");
        assert!(body["candidates"][0].get("team").is_none());
        assert_eq!(rolling.snapshot().label_assist.count, 1);
    }

    #[tokio::test]
    async fn test_label_assist_backend_unavailable_is_502() {
        let backend = StaticBackend::new(vec![], vec![]).unreachable();
        let (status, _) = post_json(app(backend), "/api/eval/label-assist", json!({"query": "x"})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_slow_request_times_out_with_408() {
        let mut config = AppConfig::default();
        config.server.request_timeout_secs = 1;
        let backend = StaticBackend::new(hits(&["a"]), vec![]).lexical_delay(Duration::from_secs(3));
        let (app, _) = app_with(backend, config);

        let (status, _) = post_json(app, "/api/search", json!({"query": "x", "mode": "lexical"})).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, body) = get_json(app(StaticBackend::new(vec![], vec![])), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"]["ok"], true);
        assert_eq!(body["embedder"]["model"], "fixed");

        let (status, body) =
            get_json(app(StaticBackend::new(vec![], vec![]).unreachable()), "/api/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["backend"]["ok"], false);
        assert!(body["backend"]["error"].is_string());
    }

    #[tokio::test]
    async fn test_healthz_reports_embedder_failure() {
        let config = AppConfig::default();
        let rolling = Arc::new(RollingMetrics::new());
        let retriever = HybridRetriever::from_config(
            &config.retrieval,
            Arc::new(StaticBackend::new(vec![], vec![])),
            Arc::new(FailingEmbedder),
            rolling.clone(),
        );
        let app = create_router(AppState {
            config: Arc::new(config),
            retriever: Arc::new(retriever),
            metrics: rolling,
            prometheus: None,
        });

        let (_, body) = get_json(app, "/healthz").await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["embedder"]["ok"], false);
    }

    #[tokio::test]
    async fn test_prometheus_without_recorder() {
        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = app(StaticBackend::new(vec![], vec![])).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = app(StaticBackend::new(vec![], vec![])).oneshot(request).await.unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[test]
    fn test_cors_origins() {
        // invalid header values are skipped rather than panicking
        let _ = cors_layer(&["https://ui.example.com".to_string(), "bad\norigin".to_string()]);
        let _ = cors_layer(&[]);
    }
}
