//! Configuration management for SearchSphere services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Search backend (Elasticsearch) configuration
    #[serde(default)]
    pub elastic: ElasticConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval and fusion tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Allowed CORS origins; empty allows any
    #[serde(default = "default_cors_origins")]
    pub cors_allow_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticConfig {
    /// Cluster endpoint
    #[serde(default = "default_elastic_url")]
    pub url: String,

    /// Index holding the chunk documents
    #[serde(default = "default_index")]
    pub index: String,

    /// Base64 API key (takes precedence over basic auth)
    pub api_key: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Field queried by BM25
    #[serde(default = "default_text_field")]
    pub text_field: String,

    /// Dense vector field queried by kNN
    #[serde(default = "default_vector_field")]
    pub vector_field: String,

    /// `_source` fields fetched per hit
    #[serde(default = "default_source_fields")]
    pub source_fields: Vec<String>,

    /// Request highlight fragments from BM25 queries
    #[serde(default)]
    pub enable_highlight: bool,

    /// HTTP timeout in seconds
    #[serde(default = "default_elastic_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries inside the embedding client
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// RRF smoothing constant
    #[serde(default = "default_k_const")]
    pub k_const: u32,

    /// Lower bound on the per-path candidate pool
    #[serde(default = "default_min_pool")]
    pub min_pool: usize,

    /// kNN candidate pool handed to the vector backend
    #[serde(default = "default_knn_num_candidates")]
    pub knn_num_candidates: usize,

    /// Upper bound for each embed/lexical/vector call in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Serve the fixed demo set instead of an empty result
    #[serde(default)]
    pub demo_fallback: bool,

    /// Evaluation items retrieved in parallel
    #[serde(default = "default_eval_concurrency")]
    pub eval_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Install the Prometheus recorder and serve `GET /metrics`
    #[serde(default = "default_prometheus_enabled")]
    pub prometheus_enabled: bool,

    /// Service name attached to logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 30 }
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string(), "http://127.0.0.1:3000".to_string()]
}
fn default_elastic_url() -> String { "http://localhost:9200".to_string() }
fn default_index() -> String { "searchsphere_docs".to_string() }
fn default_text_field() -> String { "text".to_string() }
fn default_vector_field() -> String { "vector".to_string() }
fn default_source_fields() -> Vec<String> {
    ["title", "url", "text", "team", "doc_type", "page_num", "doc_id", "chunk_id"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_elastic_timeout() -> u64 { 10 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 2 }
fn default_k_const() -> u32 { 60 }
fn default_min_pool() -> usize { 60 }
fn default_knn_num_candidates() -> usize { 120 }
fn default_call_timeout_ms() -> u64 { 10_000 }
fn default_eval_concurrency() -> usize { 4 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_prometheus_enabled() -> bool { true }
fn default_service_name() -> String { "searchsphere".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            cors_allow_origins: default_cors_origins(),
        }
    }
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: default_elastic_url(),
            index: default_index(),
            api_key: None,
            username: None,
            password: None,
            text_field: default_text_field(),
            vector_field: default_vector_field(),
            source_fields: default_source_fields(),
            enable_highlight: false,
            timeout_secs: default_elastic_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_const: default_k_const(),
            min_pool: default_min_pool(),
            knn_num_candidates: default_knn_num_candidates(),
            call_timeout_ms: default_call_timeout_ms(),
            demo_fallback: false,
            eval_concurrency: default_eval_concurrency(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            prometheus_enabled: default_prometheus_enabled(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__DEMO_FALLBACK=true
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_allow_origins")
                    .with_list_parse_key("elastic.source_fields")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl RetrievalConfig {
    /// Bound applied to every external retrieval call
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            elastic: ElasticConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
