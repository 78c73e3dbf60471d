//! Offline evaluation handlers

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use super::search::{default_k, requested_k};
use crate::AppState;
use searchsphere_common::errors::{AppError, Result};
use searchsphere_search::retrieval::EvalItem;
use searchsphere_search::{EvalOutcome, EvalRequest, Filters, LabelOutcome, LabelRequest};

/// Precision@K request over labelled queries
#[derive(Debug, Deserialize, Validate)]
pub struct PrecisionRequest {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub items: Vec<EvalItem>,

    #[serde(default = "default_k")]
    pub k: i64,

    #[serde(default)]
    pub filters: Filters,
}

/// Label-assist request for one query
#[derive(Debug, Deserialize, Validate)]
pub struct LabelAssistRequest {
    #[serde(default, alias = "q")]
    #[validate(length(max = 2000))]
    pub query: String,

    #[serde(default = "default_label_k")]
    pub k: i64,

    #[serde(default)]
    pub filters: Filters,
}

fn default_label_k() -> i64 {
    20
}

/// Score a batch of labelled queries
pub async fn precision(
    State(state): State<AppState>,
    Json(request): Json<PrecisionRequest>,
) -> Result<Json<EvalOutcome>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("items".to_string()),
    })?;

    let outcome = state
        .retriever
        .evaluate_precision(EvalRequest {
            items: request.items,
            k: requested_k(request.k),
            filters: request.filters,
        })
        .await?;

    Ok(Json(outcome))
}

/// Fused candidates for a human to label
pub async fn label_assist(
    State(state): State<AppState>,
    Json(request): Json<LabelAssistRequest>,
) -> Result<Json<LabelOutcome>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("query".to_string()),
    })?;

    let outcome = state
        .retriever
        .label_candidates(LabelRequest {
            query: request.query,
            k: requested_k(request.k),
            filters: request.filters,
        })
        .await?;

    Ok(Json(outcome))
}
