//! Metrics and observability utilities
//!
//! Two layers:
//! - [`MetricsSink`], injected into the retrieval orchestrator, recording
//!   latency samples and evaluation results fire-and-forget.
//! - Prometheus metrics through the `metrics` facade, with standardized names.
//!
//! [`RollingMetrics`] implements the sink with a bounded sample window per
//! metric and also forwards every sample to the facade.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Metrics prefix for all SearchSphere metrics
pub const METRICS_PREFIX: &str = "searchsphere";

/// Latency samples kept per metric
pub const ROLLING_WINDOW: usize = 500;

/// SLO-aligned histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms - P50 target
    0.500,  // 500ms
    1.000,  // 1s - P95 target
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Request families tracked by the rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Search,
    LabelAssist,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Search => "search",
            MetricName::LabelAssist => "label_assist",
        }
    }
}

/// Sink for request latency and evaluation results
pub trait MetricsSink: Send + Sync {
    /// Record one latency sample in milliseconds
    fn record_latency(&self, metric: MetricName, latency_ms: f64);

    /// Record the outcome of one Precision@K evaluation run
    fn record_eval_precision(&self, k: usize, precision: f64);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_latency(&self, _metric: MetricName, _latency_ms: f64) {}
    fn record_eval_precision(&self, _k: usize, _precision: f64) {}
}

#[derive(Debug)]
struct Series {
    count: u64,
    samples: VecDeque<f64>,
}

impl Series {
    fn new() -> Self {
        Self {
            count: 0,
            samples: VecDeque::with_capacity(ROLLING_WINDOW),
        }
    }

    fn push(&mut self, latency_ms: f64) {
        self.count += 1;
        if self.samples.len() == ROLLING_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    fn snapshot(&self) -> SeriesSnapshot {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        SeriesSnapshot {
            count: self.count,
            p50_ms: percentile(&sorted, 0.5),
            p95_ms: percentile(&sorted, 0.95),
            samples: sorted.len(),
        }
    }
}

#[derive(Debug)]
struct State {
    search: Series,
    label_assist: Series,
    eval: EvalSnapshot,
}

impl State {
    fn series_mut(&mut self, metric: MetricName) -> &mut Series {
        match metric {
            MetricName::Search => &mut self.search,
            MetricName::LabelAssist => &mut self.label_assist,
        }
    }
}

/// Point-in-time view of one latency series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub count: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub samples: usize,
}

/// Last evaluation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalSnapshot {
    pub k: usize,
    pub p_at_k: f64,
    pub runs: u64,
}

/// Full rolling metrics snapshot, served by the dashboard endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub search: SeriesSnapshot,
    pub label_assist: SeriesSnapshot,
    pub eval: EvalSnapshot,
}

/// Process-lifetime rolling metrics behind a single mutex
#[derive(Debug)]
pub struct RollingMetrics {
    state: Mutex<State>,
}

impl Default for RollingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingMetrics {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                search: Series::new(),
                label_assist: Series::new(),
                eval: EvalSnapshot {
                    k: 10,
                    p_at_k: 0.0,
                    runs: 0,
                },
            }),
        }
    }

    /// Copy out the current counters and percentiles
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        MetricsSnapshot {
            search: state.search.snapshot(),
            label_assist: state.label_assist.snapshot(),
            eval: state.eval.clone(),
        }
    }
}

impl MetricsSink for RollingMetrics {
    fn record_latency(&self, metric: MetricName, latency_ms: f64) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.series_mut(metric).push(latency_ms);
        }
        record_request(metric, latency_ms / 1000.0);
    }

    fn record_eval_precision(&self, k: usize, precision: f64) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.eval.k = k;
            state.eval.p_at_k = precision;
            state.eval.runs += 1;
        }
        gauge!(format!("{}_eval_precision", METRICS_PREFIX), "k" => k.to_string()).set(precision);
    }
}

/// Linear-interpolated percentile over an ascending slice
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (sorted.len() - 1) as f64 * p;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    if lower == upper {
        return sorted[lower];
    }
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search and label-assist requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Request latency in seconds"
    );

    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned from search"
    );

    describe_counter!(
        format!("{}_retrieval_path_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Embed, lexical or vector calls that failed without aborting the request"
    );

    describe_gauge!(
        format!("{}_eval_precision", METRICS_PREFIX),
        Unit::Count,
        "Mean Precision@K of the last evaluation run"
    );

    tracing::info!("Metrics registered");
}

fn record_request(metric: MetricName, duration_secs: f64) {
    counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        "kind" => metric.as_str()
    )
    .increment(1);

    histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        "kind" => metric.as_str()
    )
    .record(duration_secs);
}

/// Helper to record search metrics
pub fn record_search(mode: &str, result_count: usize) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .increment(1);

    gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .set(result_count as f64);
}

/// Helper to record a degraded retrieval path
pub fn record_path_failure(path: &str) {
    counter!(
        format!("{}_retrieval_path_failures_total", METRICS_PREFIX),
        "path" => path.to_string()
    )
    .increment(1);
}
