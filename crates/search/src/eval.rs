//! Precision@K evaluation over fused rankings.
//!
//! Pure functions: the orchestrator retrieves, these score.

use crate::normalize::normalize;
use crate::retrieval::RawHit;
use serde::Serialize;
use std::collections::HashSet;

/// Identity used to match a hit against labelled relevant ids.
///
/// The ingest-time `chunk_id` when stored, else `doc_id::page_num`, else the
/// backend id.
pub fn hit_identity(hit: &RawHit) -> String {
    let src = &hit.source;
    if let Some(chunk_id) = src.chunk_id.as_deref().filter(|c| !c.is_empty()) {
        return chunk_id.to_string();
    }
    match (src.doc_id.as_deref().filter(|d| !d.is_empty()), src.page_num) {
        (Some(doc_id), Some(page)) => format!("{}::{}", doc_id, page),
        _ => hit.id.clone(),
    }
}

/// A retrieved unit offered to a human for relevance labelling
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCandidate {
    /// Same identity [`precision_at_k`] matches labels against
    pub chunk_id: String,
    pub title: String,
    pub score: f64,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_num: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

/// Labelling view of a hit; missing optional fields are omitted, never blanked
pub fn label_candidate(hit: &RawHit) -> LabelCandidate {
    let card = normalize(hit);
    LabelCandidate {
        chunk_id: hit_identity(hit),
        title: card.title,
        score: card.score,
        snippet: card.snippet,
        page_num: hit.source.page_num,
        team: card.team.filter(|t| !t.trim().is_empty()),
        doc_type: card.doc_type.filter(|d| !d.trim().is_empty()),
    }
}

/// Fraction of the first `k` hits whose identity is relevant.
///
/// `k` below 1 is treated as 1; fewer than `k` hits are scored over what is
/// there; no hits score 0.0.
pub fn precision_at_k(hits: &[RawHit], relevant: &HashSet<String>, k: usize) -> f64 {
    let top = &hits[..hits.len().min(k.max(1))];
    if top.is_empty() {
        return 0.0;
    }
    let found = top
        .iter()
        .filter(|hit| relevant.contains(&hit_identity(hit)))
        .count();
    found as f64 / top.len() as f64
}

/// Aggregate over one evaluation batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchPrecision {
    pub mean: f64,
    pub per_query: Vec<f64>,
    pub queries: usize,
}

/// Precision@K per pair and its mean; an empty batch has mean 0.0
pub fn batch_precision(pairs: &[(Vec<RawHit>, HashSet<String>)], k: usize) -> BatchPrecision {
    let per_query: Vec<f64> = pairs
        .iter()
        .map(|(hits, relevant)| precision_at_k(hits, relevant, k))
        .collect();
    let mean = if per_query.is_empty() {
        0.0
    } else {
        per_query.iter().sum::<f64>() / per_query.len() as f64
    };
    BatchPrecision {
        mean,
        queries: per_query.len(),
        per_query,
    }
}
