//! Multi-path retrieval system
//!
//! Provides three retrieval modes:
//! - Lexical search (BM25)
//! - Vector search (kNN over query embeddings)
//! - Hybrid search (RRF fusion of vector + lexical)
//!
//! Backends are reached through [`LexicalSearch`] and [`VectorSearch`]; the
//! [`HybridRetriever`] orchestrates them and never interprets backend scores.

mod elastic;
mod fusion;
mod hybrid;

pub use elastic::ElasticBackend;
pub use fusion::{FusedCandidate, RRFusion};
pub use hybrid::{
    clamp_k, Diagnostics, EvalItem, EvalOutcome, EvalRequest, HybridRetriever, LabelOutcome,
    LabelRequest, ResultMode, Retrieval, RetrievalSettings, SearchOutcome, SearchQuery,
    LABEL_KNN_WIDEN, MATCH_ALL, MAX_K,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use searchsphere_common::errors::Result;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered hits from one backend; rank is the 1-based position
pub type RankedList = Vec<RawHit>;

/// One hit as returned by a retrieval backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    /// Backend-assigned identifier
    #[serde(rename = "_id", alias = "id", default, deserialize_with = "lenient_id")]
    pub id: String,

    /// Backend-native score; not comparable across backends
    #[serde(rename = "_score", alias = "score", default, deserialize_with = "lenient_score")]
    pub score: f64,

    /// Index that served the hit
    #[serde(rename = "_index", alias = "index", default, deserialize_with = "lenient_string")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Stored document fields
    #[serde(rename = "_source", alias = "source", default, deserialize_with = "lenient_source")]
    pub source: SourceFields,

    /// Highlighted fragments per field
    #[serde(default, deserialize_with = "lenient_highlight")]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub highlight: BTreeMap<String, Vec<String>>,
}

impl RawHit {
    /// Hit with an id and source, no score or highlights
    pub fn new(id: impl Into<String>, source: SourceFields) -> Self {
        Self {
            id: id.into(),
            score: 0.0,
            index: None,
            source,
            highlight: BTreeMap::new(),
        }
    }
}

/// Typed view of a hit's `_source`.
///
/// Every textual field is `None` when the stored value is missing or not a
/// string. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFields {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// Stable chunk identifier assigned at ingest time
    #[serde(default, deserialize_with = "lenient_identifier", skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    /// Sub-document offset (page or chunk index)
    #[serde(default, deserialize_with = "lenient_page", skip_serializing_if = "Option::is_none")]
    pub page_num: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Deduplication identity of a retrievable unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FusionKey(String);

impl FusionKey {
    /// `doc_id::page_num` when both are present, otherwise the hit id
    pub fn of(hit: &RawHit) -> Self {
        let doc_id = hit.source.doc_id.as_deref().filter(|d| !d.is_empty());
        match (doc_id, hit.source.page_num) {
            (Some(doc_id), Some(page)) => FusionKey(format!("{}::{}", doc_id, page)),
            _ => FusionKey(hit.id.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FusionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque filters forwarded to the backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<Vec<String>>,

    /// Lower bound on `created_at`; unparseable values are dropped
    #[serde(default, deserialize_with = "lenient_since", skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.team.as_ref().map_or(true, Vec::is_empty)
            && self.doc_type.as_ref().map_or(true, Vec::is_empty)
            && self.since.is_none()
    }
}

/// Retrieval mode; any unrecognised name deserializes as `Hybrid`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum RetrievalMode {
    /// BM25 lexical search
    Lexical,
    /// kNN vector search
    Vector,
    /// Combined hybrid search
    #[default]
    Hybrid,
}

impl From<&str> for RetrievalMode {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "lexical" | "bm25" => RetrievalMode::Lexical,
            "vector" | "knn" => RetrievalMode::Vector,
            _ => RetrievalMode::Hybrid,
        }
    }
}

impl From<String> for RetrievalMode {
    fn from(name: String) -> Self {
        RetrievalMode::from(name.as_str())
    }
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Lexical => "lexical",
            RetrievalMode::Vector => "vector",
            RetrievalMode::Hybrid => "hybrid",
        }
    }
}

/// Lexical (BM25) retrieval contract
#[async_trait]
pub trait LexicalSearch: Send + Sync {
    /// Up to `pool_size` hits for the query text, best first
    async fn search_lexical(&self, query: &str, pool_size: usize, filters: &Filters)
        -> Result<RankedList>;
}

/// Vector (kNN) retrieval contract
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Up to `pool_size` nearest hits out of `num_candidates` considered
    async fn search_vector(
        &self,
        vector: &[f32],
        pool_size: usize,
        num_candidates: usize,
        filters: &Filters,
    ) -> Result<RankedList>;
}

/// A backend serving both retrieval paths
#[async_trait]
pub trait SearchBackend: LexicalSearch + VectorSearch {
    /// Fails with `BackendUnavailable` when no connection can be made
    async fn ping(&self) -> Result<()>;
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_identifier<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    lenient_identifier(d).map(Option::unwrap_or_default)
}

fn lenient_score<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn lenient_page<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_source<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<SourceFields, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_default(),
        _ => SourceFields::default(),
    })
}

fn lenient_highlight<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<BTreeMap<String, Vec<String>>, D::Error> {
    let Some(Value::Object(fields)) = Option::<Value>::deserialize(d)? else {
        return Ok(BTreeMap::new());
    };
    Ok(fields
        .into_iter()
        .filter_map(|(field, fragments)| match fragments {
            Value::Array(items) => Some((
                field,
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            )),
            _ => None,
        })
        .collect())
}

fn lenient_since<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    let raw = match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        _ => return Ok(None),
    };
    Ok(parse_since(raw.trim()).or_else(|| {
        tracing::warn!(since = %raw, "Ignoring unparseable 'since' filter");
        None
    }))
}

/// RFC 3339 timestamps (trailing `Z` allowed) or plain dates at midnight UTC
pub(crate) fn parse_since(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
