//! SearchSphere Common Library
//!
//! Shared code for the SearchSphere services:
//! - Error types and handling
//! - Configuration management
//! - Embedding client abstraction
//! - Rolling metrics and Prometheus helpers

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use metrics::{MetricName, MetricsSink, RollingMetrics};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
