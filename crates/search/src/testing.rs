//! In-memory backends and embedders for tests

use crate::retrieval::{
    Filters, LexicalSearch, RankedList, RawHit, SearchBackend, SourceFields, VectorSearch,
};
use async_trait::async_trait;
use searchsphere_common::embeddings::Embedder;
use searchsphere_common::errors::{AppError, Result};
use std::sync::Mutex;
use std::time::Duration;

/// Hits with the given ids and empty sources, in order
pub fn hits(ids: &[&str]) -> Vec<RawHit> {
    ids.iter()
        .map(|id| RawHit::new(*id, SourceFields::default()))
        .collect()
}

#[derive(Debug, Default)]
struct Calls {
    lexical: Option<(String, usize)>,
    vector: Option<(usize, usize)>,
    lexical_filters: Option<Filters>,
    vector_filters: Option<Filters>,
}

/// Backend serving fixed ranked lists, truncated to the requested pool
#[derive(Debug, Default)]
pub struct StaticBackend {
    lexical: RankedList,
    vector: RankedList,
    lexical_error: Option<String>,
    vector_error: Option<String>,
    unreachable: bool,
    lexical_delay: Option<Duration>,
    vector_delay: Option<Duration>,
    calls: Mutex<Calls>,
}

impl StaticBackend {
    pub fn new(lexical: RankedList, vector: RankedList) -> Self {
        Self {
            lexical,
            vector,
            ..Default::default()
        }
    }

    pub fn failing_lexical(mut self, message: &str) -> Self {
        self.lexical_error = Some(message.to_string());
        self
    }

    pub fn failing_vector(mut self, message: &str) -> Self {
        self.vector_error = Some(message.to_string());
        self
    }

    /// Ping fails with `BackendUnavailable`
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn lexical_delay(mut self, delay: Duration) -> Self {
        self.lexical_delay = Some(delay);
        self
    }

    pub fn vector_delay(mut self, delay: Duration) -> Self {
        self.vector_delay = Some(delay);
        self
    }

    pub fn last_lexical_query(&self) -> Option<String> {
        self.calls.lock().ok()?.lexical.as_ref().map(|(q, _)| q.clone())
    }

    pub fn last_lexical_pool(&self) -> Option<usize> {
        self.calls.lock().ok()?.lexical.as_ref().map(|(_, pool)| *pool)
    }

    /// `(pool_size, num_candidates)` of the last vector call
    pub fn last_vector_call(&self) -> Option<(usize, usize)> {
        self.calls.lock().ok()?.vector
    }

    /// Filters seen by the last `(lexical, vector)` calls
    pub fn last_filters(&self) -> (Option<Filters>, Option<Filters>) {
        match self.calls.lock() {
            Ok(calls) => (calls.lexical_filters.clone(), calls.vector_filters.clone()),
            Err(_) => (None, None),
        }
    }
}

#[async_trait]
impl LexicalSearch for StaticBackend {
    async fn search_lexical(&self, query: &str, pool_size: usize, filters: &Filters) -> Result<RankedList> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.lexical = Some((query.to_string(), pool_size));
            calls.lexical_filters = Some(filters.clone());
        }
        if let Some(delay) = self.lexical_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.lexical_error {
            return Err(AppError::backend("BM25", message));
        }
        Ok(self.lexical.iter().take(pool_size).cloned().collect())
    }
}

#[async_trait]
impl VectorSearch for StaticBackend {
    async fn search_vector(
        &self,
        _vector: &[f32],
        pool_size: usize,
        num_candidates: usize,
        filters: &Filters,
    ) -> Result<RankedList> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.vector = Some((pool_size, num_candidates));
            calls.vector_filters = Some(filters.clone());
        }
        if let Some(delay) = self.vector_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.vector_error {
            return Err(AppError::backend("kNN", message));
        }
        Ok(self.vector.iter().take(pool_size).cloned().collect())
    }
}

#[async_trait]
impl SearchBackend for StaticBackend {
    async fn ping(&self) -> Result<()> {
        if self.unreachable {
            return Err(AppError::BackendUnavailable {
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

/// Embedder returning the same unit vector for every text
pub struct FixedEmbedder {
    dimension: usize,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        let value = 1.0 / (self.dimension.max(1) as f32).sqrt();
        Ok(vec![value; self.dimension])
    }

    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder that always fails
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AppError::EmbeddingError {
            message: "embedding service offline".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        0
    }
}
