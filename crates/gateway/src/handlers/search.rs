//! Search handlers

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use searchsphere_common::errors::{AppError, Result};
use searchsphere_search::retrieval::clamp_k;
use searchsphere_search::{Filters, RetrievalMode, SearchOutcome, SearchQuery};

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    /// Query text; blank matches everything
    #[serde(default, alias = "q")]
    #[validate(length(max = 2000))]
    pub query: String,

    /// Results to return, clamped to 1..=50
    #[serde(default = "default_k")]
    pub k: i64,

    /// Search mode: lexical (bm25), vector (knn), anything else is hybrid
    #[serde(default)]
    pub mode: RetrievalMode,

    #[serde(default)]
    pub filters: Filters,

    /// Precomputed query embedding
    #[serde(default)]
    pub query_vector: Option<Vec<f32>>,
}

pub(crate) fn default_k() -> i64 {
    10
}

/// Any integer is accepted; out-of-range values are clamped, not rejected
pub(crate) fn requested_k(k: i64) -> usize {
    clamp_k(usize::try_from(k).unwrap_or(0))
}

/// Perform a search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchOutcome>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("query".to_string()),
    })?;

    let outcome = state
        .retriever
        .search(SearchQuery {
            query: request.query,
            k: requested_k(request.k),
            mode: request.mode,
            filters: request.filters,
            query_vector: request.query_vector,
        })
        .await?;

    Ok(Json(outcome))
}
