//! Hybrid retrieval combining vector and BM25 search
//!
//! Runs both paths concurrently, records each path's failure without failing
//! the request, and fuses what came back with RRF. The only hard failure is a
//! backend that cannot be reached at all.

use super::{fusion::RRFusion, Filters, RankedList, RawHit, RetrievalMode, SearchBackend};
use crate::demo::demo_hits;
use crate::eval::{batch_precision, label_candidate, LabelCandidate};
use crate::normalize::{normalize, Candidate};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use searchsphere_common::config::RetrievalConfig;
use searchsphere_common::embeddings::Embedder;
use searchsphere_common::errors::{AppError, Result};
use searchsphere_common::metrics::{self, MetricName, MetricsSink};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest `k` a caller may ask for
pub const MAX_K: usize = 50;

/// Query text standing in for "match everything"
pub const MATCH_ALL: &str = "*";

/// kNN candidates per pooled hit when gathering label candidates
pub const LABEL_KNN_WIDEN: usize = 5;

/// Tuning knobs for the orchestrator
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Lower bound on each path's candidate pool
    pub min_pool: usize,
    pub knn_num_candidates: usize,
    /// Bound on every embed/lexical/vector call
    pub call_timeout: Duration,
    pub demo_fallback: bool,
    pub eval_concurrency: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

impl RetrievalSettings {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            min_pool: config.min_pool,
            knn_num_candidates: config.knn_num_candidates,
            call_timeout: config.call_timeout(),
            demo_fallback: config.demo_fallback,
            eval_concurrency: config.eval_concurrency.max(1),
        }
    }
}

/// Non-fatal failures collected while serving one query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_err: Option<String>,
    /// Repeats `embed_err` when the embed step disabled the vector path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_err: Option<String>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.embed_err.is_none() && self.lexical_err.is_none() && self.vector_err.is_none()
    }

    /// Distinct failures as `(path label, error)`, in pipeline order
    pub fn failures(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(err) = &self.embed_err {
            out.push(("Embedding", err.as_str()));
        }
        if let Some(err) = &self.lexical_err {
            out.push(("BM25", err.as_str()));
        }
        if self.embed_err.is_none() {
            if let Some(err) = &self.vector_err {
                out.push(("kNN", err.as_str()));
            }
        }
        out
    }
}

/// Fused hits for one query plus what went wrong on the way
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub hits: Vec<RawHit>,
    pub diagnostics: Diagnostics,
}

impl Retrieval {
    pub fn candidates(&self) -> Vec<Candidate> {
        self.hits.iter().map(normalize).collect()
    }
}

/// Input of a search call
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub k: usize,
    pub mode: RetrievalMode,
    pub filters: Filters,
    /// Skips the embedding call when supplied
    pub query_vector: Option<Vec<f32>>,
}

/// Which path produced the results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    Lexical,
    Vector,
    Hybrid,
    Demo,
}

impl From<RetrievalMode> for ResultMode {
    fn from(mode: RetrievalMode) -> Self {
        match mode {
            RetrievalMode::Lexical => ResultMode::Lexical,
            RetrievalMode::Vector => ResultMode::Vector,
            RetrievalMode::Hybrid => ResultMode::Hybrid,
        }
    }
}

impl ResultMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultMode::Lexical => "lexical",
            ResultMode::Vector => "vector",
            ResultMode::Hybrid => "hybrid",
            ResultMode::Demo => "demo",
        }
    }
}

/// Output of a search call
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<Candidate>,
    pub mode: ResultMode,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One labelled query of an evaluation batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalItem {
    pub query: String,
    #[serde(default)]
    pub relevant_ids: Vec<String>,
}

/// Input of a Precision@K evaluation
#[derive(Debug, Clone, Default)]
pub struct EvalRequest {
    pub items: Vec<EvalItem>,
    pub k: usize,
    pub filters: Filters,
}

/// Output of a Precision@K evaluation
#[derive(Debug, Clone, Serialize)]
pub struct EvalOutcome {
    pub k: usize,
    pub precision_at_k: f64,
    pub per_query: Vec<f64>,
    pub queries: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Input of a label-assist call
#[derive(Debug, Clone, Default)]
pub struct LabelRequest {
    pub query: String,
    pub k: usize,
    pub filters: Filters,
}

/// Candidates to label for one query
#[derive(Debug, Clone, Serialize)]
pub struct LabelOutcome {
    pub query: String,
    pub k: usize,
    pub candidates: Vec<LabelCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Orchestrates lexical and vector retrieval over one backend
pub struct HybridRetriever {
    backend: Arc<dyn SearchBackend>,
    embedder: Arc<dyn Embedder>,
    fusion: RRFusion,
    settings: RetrievalSettings,
    metrics: Arc<dyn MetricsSink>,
}

impl HybridRetriever {
    /// Create a new hybrid retriever
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        embedder: Arc<dyn Embedder>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            backend,
            embedder,
            fusion: RRFusion::default(),
            settings: RetrievalSettings::default(),
            metrics,
        }
    }

    /// Build from the `retrieval` config section
    pub fn from_config(
        config: &RetrievalConfig,
        backend: Arc<dyn SearchBackend>,
        embedder: Arc<dyn Embedder>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self::new(backend, embedder, metrics)
            .with_fusion(RRFusion::new(config.k_const))
            .with_settings(RetrievalSettings::from_config(config))
    }

    pub fn with_fusion(mut self, fusion: RRFusion) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_settings(mut self, settings: RetrievalSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Same reachability check every request runs first
    pub async fn check_backend(&self) -> Result<()> {
        self.ensure_backend().await
    }

    /// Embed a fixed text within the call timeout
    pub async fn check_embedder(&self) -> Result<()> {
        self.resolve_vector("healthcheck", None).await.map(|_| ())
    }

    /// Fused hits for a query, at most `k`.
    ///
    /// Uses `query_vector` when given, otherwise embeds the query.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filters: &Filters,
        query_vector: Option<Vec<f32>>,
    ) -> Result<Retrieval> {
        self.ensure_backend().await?;
        Ok(self.retrieve_ready(query, k, filters, query_vector, 1).await)
    }

    /// Search in the requested mode and normalize the results
    pub async fn search(&self, request: SearchQuery) -> Result<SearchOutcome> {
        let start = Instant::now();
        let k = clamp_k(request.k);
        let query = effective_query(&request.query);

        self.ensure_backend().await?;

        let pool = self.pool_size(k);
        let (hits, warnings) = match request.mode {
            RetrievalMode::Lexical => match self.lexical(query, pool, &request.filters).await {
                Ok(mut hits) => {
                    hits.truncate(k);
                    (hits, Vec::new())
                }
                Err(e) => {
                    log_path_failure("BM25", query, &e);
                    (Vec::new(), vec![e.to_string()])
                }
            },
            RetrievalMode::Vector => self.vector_only(query, k, &request).await,
            RetrievalMode::Hybrid => {
                let retrieval = self
                    .retrieve_ready(query, k, &request.filters, request.query_vector, 1)
                    .await;
                let warnings = retrieval
                    .diagnostics
                    .failures()
                    .into_iter()
                    .map(|(_, err)| err.to_string())
                    .collect();
                (retrieval.hits, warnings)
            }
        };

        let (hits, mode) = if hits.is_empty() && self.settings.demo_fallback {
            (demo_hits(), ResultMode::Demo)
        } else {
            (hits, ResultMode::from(request.mode))
        };

        let results: Vec<Candidate> = hits.iter().map(normalize).collect();
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.metrics.record_latency(MetricName::Search, latency_ms);
        metrics::record_search(mode.as_str(), results.len());

        tracing::info!(
            query = %query,
            mode = mode.as_str(),
            results = results.len(),
            warnings = warnings.len(),
            latency_ms,
            "Search completed"
        );

        Ok(SearchOutcome {
            results,
            mode,
            latency_ms,
            warnings,
        })
    }

    /// Hybrid retrieval for every item, scored with Precision@K
    pub async fn evaluate_precision(&self, request: EvalRequest) -> Result<EvalOutcome> {
        let k = clamp_k(request.k);
        self.ensure_backend().await?;

        let top = self.pool_size(k);
        let filters = &request.filters;
        // Boxed so the stream item type carries one concrete lifetime
        let pending: Vec<BoxFuture<'_, Retrieval>> = request
            .items
            .iter()
            .map(|item| {
                let query = effective_query(&item.query).to_string();
                async move { self.retrieve_ready(&query, top, filters, None, 1).await }.boxed()
            })
            .collect();
        let retrievals: Vec<Retrieval> = stream::iter(pending)
            .buffered(self.settings.eval_concurrency)
            .collect()
            .await;

        let mut warnings = Vec::new();
        let mut pairs = Vec::with_capacity(request.items.len());
        for (item, retrieval) in request.items.iter().zip(retrievals) {
            let preview: String = item.query.chars().take(30).collect();
            for (path, err) in retrieval.diagnostics.failures() {
                warnings.push(format!("{} failed for '{}…': {}", path, preview, err));
            }
            let relevant: HashSet<String> = item.relevant_ids.iter().cloned().collect();
            pairs.push((retrieval.hits, relevant));
        }

        let agg = batch_precision(&pairs, k);
        self.metrics.record_eval_precision(k, agg.mean);

        tracing::info!(
            k,
            queries = agg.queries,
            precision = agg.mean,
            warnings = warnings.len(),
            "Precision evaluation completed"
        );

        Ok(EvalOutcome {
            k,
            precision_at_k: agg.mean,
            per_query: agg.per_query,
            queries: agg.queries,
            warnings,
        })
    }

    /// Fused hybrid candidates for building labelled evaluation sets.
    ///
    /// Casts a wider kNN net than search so labellers see near misses too.
    pub async fn label_candidates(&self, request: LabelRequest) -> Result<LabelOutcome> {
        let start = Instant::now();
        let k = clamp_k(request.k);
        let query = effective_query(&request.query);

        self.ensure_backend().await?;

        let retrieval = self
            .retrieve_ready(query, k, &request.filters, None, LABEL_KNN_WIDEN)
            .await;
        let warnings: Vec<String> = retrieval
            .diagnostics
            .failures()
            .into_iter()
            .map(|(_, err)| err.to_string())
            .collect();
        let candidates: Vec<LabelCandidate> = retrieval.hits.iter().map(label_candidate).collect();

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_latency(MetricName::LabelAssist, latency_ms);
        tracing::info!(
            query = %query,
            k,
            candidates = candidates.len(),
            warnings = warnings.len(),
            latency_ms,
            "Label candidates retrieved"
        );

        Ok(LabelOutcome {
            query: request.query,
            k,
            candidates,
            warnings,
        })
    }

    fn pool_size(&self, k: usize) -> usize {
        self.settings.min_pool.max(k)
    }

    async fn ensure_backend(&self) -> Result<()> {
        match bounded("backend ping", self.settings.call_timeout, self.backend.ping()).await {
            Ok(()) => Ok(()),
            Err(AppError::BackendUnavailable { message }) => {
                Err(AppError::BackendUnavailable { message })
            }
            Err(e) => Err(AppError::BackendUnavailable {
                message: e.to_string(),
            }),
        }
    }

    /// Retrieval once the backend is known to be reachable; never fails.
    ///
    /// The kNN candidate pool is `knn_widen` times the hit pool, never below
    /// the configured `knn_num_candidates`. A match-all query only takes the
    /// vector path when a vector is supplied.
    async fn retrieve_ready(
        &self,
        query: &str,
        k: usize,
        filters: &Filters,
        query_vector: Option<Vec<f32>>,
        knn_widen: usize,
    ) -> Retrieval {
        let pool = self.pool_size(k);
        let mut diagnostics = Diagnostics::default();

        let supplied = query_vector.filter(|v| !v.is_empty());
        let vector = match supplied {
            Some(vector) => Some(vector),
            None if query == MATCH_ALL => None,
            None => match self.resolve_vector(query, None).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    log_path_failure("Embedding", query, &e);
                    let message = e.to_string();
                    diagnostics.vector_err = Some(message.clone());
                    diagnostics.embed_err = Some(message);
                    None
                }
            },
        };

        let vector_call = async {
            match &vector {
                Some(v) => Some(self.vector(v, pool, pool * knn_widen.max(1), filters).await),
                None => None,
            }
        };
        let (lexical, vector_hits) = tokio::join!(self.lexical(query, pool, filters), vector_call);

        let mut lexical = lexical.unwrap_or_else(|e| {
            log_path_failure("BM25", query, &e);
            diagnostics.lexical_err = Some(e.to_string());
            Vec::new()
        });

        let vector_hits = match vector_hits {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => {
                log_path_failure("kNN", query, &e);
                diagnostics.vector_err = Some(e.to_string());
                Vec::new()
            }
            None => Vec::new(),
        };

        let hits = if vector_hits.is_empty() {
            lexical.truncate(k);
            lexical
        } else {
            self.fusion.fuse_hits(vector_hits, lexical, k)
        };

        Retrieval { hits, diagnostics }
    }

    async fn vector_only(
        &self,
        query: &str,
        k: usize,
        request: &SearchQuery,
    ) -> (Vec<RawHit>, Vec<String>) {
        let mut warnings = Vec::new();
        let supplied = request.query_vector.clone().filter(|v| !v.is_empty());
        let vector = match supplied {
            Some(v) => Some(v),
            None if query == MATCH_ALL => None,
            None => match self.resolve_vector(query, None).await {
                Ok(v) => Some(v),
                Err(e) => {
                    log_path_failure("Embedding", query, &e);
                    warnings.push(e.to_string());
                    None
                }
            },
        };

        let Some(vector) = vector else {
            warnings.push("query_vector missing".to_string());
            return (Vec::new(), warnings);
        };

        let pool = self.pool_size(k);
        match self.vector(&vector, pool, pool, &request.filters).await {
            Ok(mut hits) => {
                hits.truncate(k);
                (hits, warnings)
            }
            Err(e) => {
                log_path_failure("kNN", query, &e);
                warnings.push(e.to_string());
                (Vec::new(), warnings)
            }
        }
    }

    async fn resolve_vector(&self, query: &str, supplied: Option<Vec<f32>>) -> Result<Vec<f32>> {
        if let Some(vector) = supplied.filter(|v| !v.is_empty()) {
            return Ok(vector);
        }
        let timeout = self.settings.call_timeout;
        match tokio::time::timeout(timeout, self.embedder.embed(query)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::EmbeddingTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn lexical(&self, query: &str, pool: usize, filters: &Filters) -> Result<RankedList> {
        bounded(
            "BM25",
            self.settings.call_timeout,
            self.backend.search_lexical(query, pool, filters),
        )
        .await
    }

    async fn vector(
        &self,
        vector: &[f32],
        pool: usize,
        min_candidates: usize,
        filters: &Filters,
    ) -> Result<RankedList> {
        let num_candidates = self.settings.knn_num_candidates.max(min_candidates);
        bounded(
            "kNN",
            self.settings.call_timeout,
            self.backend.search_vector(vector, pool, num_candidates, filters),
        )
        .await
    }
}

/// Clamp a requested result count into `[1, MAX_K]`
pub fn clamp_k(k: usize) -> usize {
    k.clamp(1, MAX_K)
}

/// Blank queries match everything
fn effective_query(query: &str) -> &str {
    match query.trim() {
        "" => MATCH_ALL,
        trimmed => trimmed,
    }
}

async fn bounded<T>(
    path: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| AppError::Timeout {
            path: path.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
}

fn log_path_failure(path: &str, query: &str, error: &AppError) {
    metrics::record_path_failure(path);
    tracing::warn!(path, query = %query, error = %error, "Retrieval path failed, continuing degraded");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::SourceFields;
    use crate::testing::{hits, FailingEmbedder, FixedEmbedder, StaticBackend};
    use searchsphere_common::metrics::{NoopMetrics, RollingMetrics};
    use tokio_test::{assert_err, assert_ok};

    fn build(backend: StaticBackend, embedder: Arc<dyn Embedder>) -> (HybridRetriever, Arc<RollingMetrics>) {
        let metrics = Arc::new(RollingMetrics::new());
        let retriever = HybridRetriever::new(Arc::new(backend), embedder, metrics.clone());
        (retriever, metrics)
    }

    fn ids(hits: &[RawHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    fn hybrid(query: &str, k: usize) -> SearchQuery {
        SearchQuery {
            query: query.to_string(),
            k,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hybrid_fuses_both_paths() {
        let backend = StaticBackend::new(hits(&["d1", "d2", "d3"]), hits(&["d3", "d1", "d4"]));
        let (retriever, _) = build(backend, Arc::new(FixedEmbedder::new(4)));

        let retrieval = assert_ok!(retriever.retrieve("fusion", 3, &Filters::default(), None).await);

        assert_eq!(ids(&retrieval.hits), vec!["d1", "d3", "d2"]);
        assert!(retrieval.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_pool_is_widened_beyond_k() {
        let backend = Arc::new(StaticBackend::new(hits(&["a"]), hits(&["b"])));
        let retriever =
            HybridRetriever::new(backend.clone(), Arc::new(FixedEmbedder::new(4)), Arc::new(NoopMetrics));

        assert_ok!(retriever.retrieve("q", 5, &Filters::default(), None).await);
        assert_eq!(backend.last_lexical_pool(), Some(60));
        assert_eq!(backend.last_vector_call(), Some((60, 120)));

        assert_ok!(retriever.retrieve("q", 80, &Filters::default(), None).await);
        assert_eq!(backend.last_lexical_pool(), Some(80));
        assert_eq!(backend.last_vector_call(), Some((80, 120)));
    }

    #[tokio::test]
    async fn test_vector_failure_degrades_to_lexical() {
        let backend = StaticBackend::new(hits(&["l1", "l2", "l3", "l4"]), vec![])
            .failing_vector("knn index missing");
        let (retriever, metrics) = build(backend, Arc::new(FixedEmbedder::new(4)));

        let outcome = assert_ok!(retriever.search(hybrid("budget", 2)).await);

        assert_eq!(outcome.mode, ResultMode::Hybrid);
        let result_ids: Vec<_> = outcome.results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(result_ids, vec!["l1", "l2"]);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("knn index missing"));
        assert_eq!(metrics.snapshot().search.count, 1);
    }

    #[tokio::test]
    async fn test_embed_failure_disables_vector_path() {
        let backend = Arc::new(StaticBackend::new(hits(&["l1"]), hits(&["v1"])));
        let metrics = Arc::new(RollingMetrics::new());
        let retriever = HybridRetriever::new(backend.clone(), Arc::new(FailingEmbedder), metrics);

        let retrieval = assert_ok!(retriever.retrieve("q", 10, &Filters::default(), None).await);

        assert_eq!(ids(&retrieval.hits), vec!["l1"]);
        assert!(retrieval.diagnostics.embed_err.is_some());
        assert_eq!(retrieval.diagnostics.vector_err, retrieval.diagnostics.embed_err);
        assert_eq!(retrieval.diagnostics.failures().len(), 1);
        assert_eq!(backend.last_vector_call(), None);
    }

    #[tokio::test]
    async fn test_supplied_vector_skips_embedding() {
        let backend = StaticBackend::new(vec![], hits(&["v1", "v2"]));
        let (retriever, _) = build(backend, Arc::new(FailingEmbedder));

        let retrieval = assert_ok!(
            retriever
                .retrieve("q", 10, &Filters::default(), Some(vec![0.1, 0.2]))
                .await
        );

        assert_eq!(ids(&retrieval.hits), vec!["v1", "v2"]);
        assert!(retrieval.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_both_paths_failing_is_still_success() {
        let backend = StaticBackend::new(vec![], vec![])
            .failing_lexical("parse error")
            .failing_vector("knn down");
        let (retriever, _) = build(backend, Arc::new(FixedEmbedder::new(4)));

        let outcome = assert_ok!(retriever.search(hybrid("q", 5)).await);

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.mode, ResultMode::Hybrid);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_hard_failure() {
        let backend = StaticBackend::new(hits(&["l1"]), vec![]).unreachable();
        let (retriever, _) = build(backend, Arc::new(FixedEmbedder::new(4)));

        let err = assert_err!(retriever.search(hybrid("q", 5)).await);
        assert!(matches!(err, AppError::BackendUnavailable { .. }));

        let err = assert_err!(retriever.retrieve("q", 5, &Filters::default(), None).await);
        assert!(matches!(err, AppError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_demo_fallback_when_enabled() {
        let (retriever, _) = build(StaticBackend::new(vec![], vec![]), Arc::new(FixedEmbedder::new(4)));
        let retriever = retriever.with_settings(RetrievalSettings {
            demo_fallback: true,
            ..RetrievalSettings::default()
        });

        let outcome = assert_ok!(retriever.search(hybrid("nothing matches", 5)).await);

        assert_eq!(outcome.mode, ResultMode::Demo);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].id, "demo1");
    }

    #[tokio::test]
    async fn test_demo_fallback_off_by_default() {
        let (retriever, _) = build(StaticBackend::new(vec![], vec![]), Arc::new(FixedEmbedder::new(4)));

        let outcome = assert_ok!(retriever.search(hybrid("nothing matches", 5)).await);

        assert_eq!(outcome.mode, ResultMode::Hybrid);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_lexical_mode_and_blank_query() {
        let backend = Arc::new(StaticBackend::new(hits(&["a", "b", "c"]), hits(&["z"])));
        let metrics = Arc::new(RollingMetrics::new());
        let retriever = HybridRetriever::new(backend.clone(), Arc::new(FixedEmbedder::new(4)), metrics);

        let outcome = assert_ok!(
            retriever
                .search(SearchQuery {
                    query: "   ".into(),
                    k: 2,
                    mode: RetrievalMode::Lexical,
                    ..Default::default()
                })
                .await
        );

        assert_eq!(outcome.mode, ResultMode::Lexical);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(backend.last_lexical_query().as_deref(), Some(MATCH_ALL));
        assert_eq!(backend.last_vector_call(), None);
    }

    #[tokio::test]
    async fn test_vector_mode_without_vector_warns() {
        let backend = StaticBackend::new(hits(&["a"]), hits(&["v"]));
        let (retriever, _) = build(backend, Arc::new(FailingEmbedder));

        let outcome = assert_ok!(
            retriever
                .search(SearchQuery {
                    query: "q".into(),
                    k: 5,
                    mode: RetrievalMode::Vector,
                    ..Default::default()
                })
                .await
        );

        assert!(outcome.results.is_empty());
        assert!(outcome.warnings.iter().any(|w| w == "query_vector missing"));
    }

    #[tokio::test]
    async fn test_vector_mode_with_supplied_vector() {
        let backend = StaticBackend::new(hits(&["a"]), hits(&["v1", "v2", "v3"]));
        let (retriever, _) = build(backend, Arc::new(FailingEmbedder));

        let outcome = assert_ok!(
            retriever
                .search(SearchQuery {
                    query: "q".into(),
                    k: 2,
                    mode: RetrievalMode::Vector,
                    query_vector: Some(vec![0.5; 4]),
                    ..Default::default()
                })
                .await
        );

        assert_eq!(outcome.mode, ResultMode::Vector);
        let result_ids: Vec<_> = outcome.results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(result_ids, vec!["v1", "v2"]);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_slow_path_times_out_without_failing_request() {
        let backend = StaticBackend::new(hits(&["l1"]), hits(&["v1"]))
            .vector_delay(Duration::from_millis(200));
        let (retriever, _) = build(backend, Arc::new(FixedEmbedder::new(4)));
        let retriever = retriever.with_settings(RetrievalSettings {
            call_timeout: Duration::from_millis(20),
            ..RetrievalSettings::default()
        });

        let retrieval = assert_ok!(retriever.retrieve("q", 5, &Filters::default(), None).await);

        assert_eq!(ids(&retrieval.hits), vec!["l1"]);
        let vector_err = retrieval.diagnostics.vector_err.unwrap();
        assert!(vector_err.contains("timed out"));
    }

    #[tokio::test]
    async fn test_k_is_clamped() {
        let many: Vec<String> = (0..70).map(|i| format!("h{}", i)).collect();
        let many: Vec<&str> = many.iter().map(String::as_str).collect();
        let (retriever, _) = build(StaticBackend::new(hits(&many), vec![]), Arc::new(FailingEmbedder));

        let outcome = assert_ok!(retriever.search(hybrid("q", 500)).await);
        assert_eq!(outcome.results.len(), MAX_K);

        let outcome = assert_ok!(retriever.search(hybrid("q", 0)).await);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_precision() {
        let backend = StaticBackend::new(hits(&["r1", "x", "r2", "y"]), vec![]);
        let (retriever, metrics) = build(backend, Arc::new(FixedEmbedder::new(4)));

        let outcome = assert_ok!(
            retriever
                .evaluate_precision(EvalRequest {
                    items: vec![
                        EvalItem {
                            query: "first".into(),
                            relevant_ids: vec!["r1".into(), "r2".into()],
                        },
                        EvalItem {
                            query: "second".into(),
                            relevant_ids: vec![],
                        },
                    ],
                    k: 2,
                    filters: Filters::default(),
                })
                .await
        );

        assert_eq!(outcome.k, 2);
        assert_eq!(outcome.per_query, vec![0.5, 0.0]);
        assert_eq!(outcome.precision_at_k, 0.25);
        assert_eq!(outcome.queries, 2);
        assert!(outcome.warnings.is_empty());

        let snap = metrics.snapshot();
        assert_eq!(snap.eval.k, 2);
        assert_eq!(snap.eval.runs, 1);
    }

    #[tokio::test]
    async fn test_evaluate_precision_collects_warnings() {
        let backend = StaticBackend::new(hits(&["r1"]), vec![]);
        let (retriever, _) = build(backend, Arc::new(FailingEmbedder));

        let outcome = assert_ok!(
            retriever
                .evaluate_precision(EvalRequest {
                    items: vec![EvalItem {
                        query: "a query that is definitely longer than thirty characters".into(),
                        relevant_ids: vec!["r1".into()],
                    }],
                    k: 10,
                    filters: Filters::default(),
                })
                .await
        );

        assert_eq!(outcome.precision_at_k, 1.0);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("Embedding failed for 'a query that is definitely lon…'"));
    }

    #[tokio::test]
    async fn test_health_checks() {
        let (retriever, _) = build(StaticBackend::new(vec![], vec![]), Arc::new(FixedEmbedder::new(4)));
        assert_ok!(retriever.check_backend().await);
        assert_ok!(retriever.check_embedder().await);
        assert_eq!(retriever.embedding_model(), "fixed");

        let (retriever, _) = build(StaticBackend::new(vec![], vec![]).unreachable(), Arc::new(FailingEmbedder));
        assert_err!(retriever.check_backend().await);
        assert_err!(retriever.check_embedder().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_run_concurrently() {
        let backend = StaticBackend::new(hits(&["l1"]), hits(&["v1"]))
            .lexical_delay(Duration::from_millis(100))
            .vector_delay(Duration::from_millis(100));
        let (retriever, _) = build(backend, Arc::new(FixedEmbedder::new(4)));

        let start = tokio::time::Instant::now();
        let retrieval = assert_ok!(retriever.retrieve("q", 5, &Filters::default(), None).await);
        let elapsed = start.elapsed();

        assert_eq!(retrieval.hits.len(), 2);
        assert!(elapsed < Duration::from_millis(150), "paths ran one after the other: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_filters_reach_both_paths() {
        let backend = Arc::new(StaticBackend::new(hits(&["l1"]), hits(&["v1"])));
        let retriever =
            HybridRetriever::new(backend.clone(), Arc::new(FixedEmbedder::new(4)), Arc::new(NoopMetrics));
        let filters = Filters {
            team: Some(vec!["finops".into()]),
            doc_type: Some(vec!["runbook".into()]),
            since: None,
        };

        assert_ok!(retriever.retrieve("q", 5, &filters, None).await);

        let (lexical, vector) = backend.last_filters();
        assert_eq!(lexical.as_ref(), Some(&filters));
        assert_eq!(vector.as_ref(), Some(&filters));
    }

    #[tokio::test]
    async fn test_blank_hybrid_query_skips_vector_path() {
        let backend = Arc::new(StaticBackend::new(hits(&["a", "b"]), hits(&["z"])));
        let retriever =
            HybridRetriever::new(backend.clone(), Arc::new(FixedEmbedder::new(4)), Arc::new(NoopMetrics));

        let outcome = assert_ok!(retriever.search(hybrid("  ", 5)).await);

        let result_ids: Vec<_> = outcome.results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(result_ids, vec!["a", "b"]);
        assert!(outcome.warnings.is_empty());
        assert_eq!(backend.last_lexical_query().as_deref(), Some(MATCH_ALL));
        assert_eq!(backend.last_vector_call(), None);

        let supplied = assert_ok!(
            retriever
                .retrieve(MATCH_ALL, 5, &Filters::default(), Some(vec![0.5; 4]))
                .await
        );
        assert_eq!(ids(&supplied.hits), vec!["z", "a", "b"]);
    }

    #[tokio::test]
    async fn test_label_candidates() {
        let paged = RawHit::new(
            "es-1",
            SourceFields {
                doc_id: Some("handbook".into()),
                page_num: Some(2),
                title: Some("Handbook".into()),
                team: Some("people".into()),
                ..Default::default()
            },
        );
        let backend = Arc::new(StaticBackend::new(vec![paged.clone()], vec![paged]));
        let metrics = Arc::new(RollingMetrics::new());
        let retriever = HybridRetriever::new(backend.clone(), Arc::new(FixedEmbedder::new(4)), metrics.clone());

        let outcome = assert_ok!(
            retriever
                .label_candidates(LabelRequest {
                    query: "leave policy".into(),
                    k: 20,
                    filters: Filters::default(),
                })
                .await
        );

        assert_eq!(outcome.query, "leave policy");
        assert_eq!(outcome.k, 20);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].chunk_id, "handbook::2");
        assert_eq!(outcome.candidates[0].team.as_deref(), Some("people"));
        assert!(outcome.warnings.is_empty());
        assert_eq!(backend.last_vector_call(), Some((60, 300)));
        assert_eq!(metrics.snapshot().label_assist.count, 1);
        assert_eq!(metrics.snapshot().search.count, 0);
    }

    #[tokio::test]
    async fn test_label_candidates_degrade_and_fail_like_search() {
        let backend = StaticBackend::new(hits(&["l1"]), vec![]);
        let (retriever, _) = build(backend, Arc::new(FailingEmbedder));
        let outcome = assert_ok!(retriever.label_candidates(LabelRequest::default()).await);
        assert_eq!(outcome.k, 1);
        assert_eq!(outcome.candidates[0].chunk_id, "l1");
        assert!(outcome.warnings.is_empty());

        let outcome = assert_ok!(
            retriever
                .label_candidates(LabelRequest {
                    query: "q".into(),
                    k: 5,
                    ..Default::default()
                })
                .await
        );
        assert_eq!(outcome.warnings.len(), 1);

        let (retriever, _) = build(StaticBackend::new(vec![], vec![]).unreachable(), Arc::new(FixedEmbedder::new(4)));
        let err = assert_err!(retriever.label_candidates(LabelRequest::default()).await);
        assert!(matches!(err, AppError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_eval_batch() {
        let (retriever, _) = build(StaticBackend::new(vec![], vec![]), Arc::new(FixedEmbedder::new(4)));

        let outcome = assert_ok!(retriever.evaluate_precision(EvalRequest::default()).await);

        assert_eq!(outcome.precision_at_k, 0.0);
        assert_eq!(outcome.queries, 0);
        assert_eq!(outcome.k, 1);
    }
}
