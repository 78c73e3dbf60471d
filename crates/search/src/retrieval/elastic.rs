//! Elasticsearch backend over the REST API
//!
//! BM25 queries relax step by step until something matches; kNN queries
//! carry filters at the top level and fall back to a `bool` filter query for
//! clusters that reject that form.

use super::{Filters, LexicalSearch, RankedList, RawHit, SearchBackend, VectorSearch};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use searchsphere_common::config::ElasticConfig;
use searchsphere_common::errors::{AppError, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const LEXICAL_PATH: &str = "BM25";
const VECTOR_PATH: &str = "kNN";

#[derive(Debug, Clone)]
enum Auth {
    None,
    ApiKey(String),
    Basic { username: String, password: String },
}

/// Elasticsearch implementation of both retrieval paths
pub struct ElasticBackend {
    client: Client,
    base_url: String,
    index: String,
    auth: Auth,
    text_field: String,
    vector_field: String,
    source_fields: Vec<String>,
    enable_highlight: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: HitsEnvelope,
}

#[derive(Debug, Default, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

impl ElasticBackend {
    /// Create a backend client from config
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let auth = match (&config.api_key, &config.username, &config.password) {
            (Some(key), _, _) if !key.is_empty() => Auth::ApiKey(key.clone()),
            (_, Some(username), Some(password)) => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => Auth::None,
        };

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            auth,
            text_field: config.text_field.clone(),
            vector_field: config.vector_field.clone(),
            source_fields: config.source_fields.clone(),
            enable_highlight: config.enable_highlight,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::ApiKey(key) => request.header("Authorization", format!("ApiKey {}", key)),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }

    async fn run_search(&self, path: &str, body: &Value) -> Result<RankedList> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let response = self
            .authorized(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::backend(path, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::backend(path, format!("HTTP {}: {}", status, text)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::backend(path, format!("Malformed response: {}", e)))?;

        Ok(parsed.hits.hits)
    }

    fn source_filter(&self) -> Value {
        if self.source_fields.is_empty() {
            Value::Bool(true)
        } else {
            json!(self.source_fields)
        }
    }

    /// Query bodies tried in order; the first that matches anything wins
    fn lexical_ladder(&self, query: &str, size: usize, filters: &Filters) -> Vec<Value> {
        let clauses = filter_clauses(filters);
        let query = query.trim();

        if query.is_empty() || query == "*" {
            return vec![self.bool_body(json!({"match_all": {}}), &clauses, size, None)];
        }

        let text_field = self.text_field.as_str();
        let multi_fields = [text_field, "title^2", "content", "body", "meta.*"];
        let highlight = |fields: &[&str]| {
            self.enable_highlight.then(|| {
                let fields: serde_json::Map<String, Value> = fields
                    .iter()
                    .map(|f| (f.to_string(), json!({"number_of_fragments": 1})))
                    .collect();
                json!({ "fields": fields })
            })
        };

        vec![
            self.bool_body(
                json!({"match": {text_field: {"query": query}}}),
                &clauses,
                size,
                highlight(&[text_field]),
            ),
            self.bool_body(
                json!({"multi_match": {"query": query, "fields": multi_fields}}),
                &clauses,
                size,
                highlight(&multi_fields),
            ),
            self.bool_body(
                json!({"query_string": {"query": query, "default_field": "*"}}),
                &clauses,
                size,
                None,
            ),
            self.bool_body(json!({"match_all": {}}), &clauses, size, None),
        ]
    }

    fn bool_body(&self, must: Value, filter: &[Value], size: usize, highlight: Option<Value>) -> Value {
        let mut body = json!({
            "query": {"bool": {"must": [must], "filter": filter}},
            "_source": self.source_filter(),
            "size": size,
        });
        if let Some(highlight) = highlight {
            body["highlight"] = highlight;
        }
        body
    }

    /// Primary kNN body and the `bool`-filter fallback
    fn knn_bodies(
        &self,
        vector: &[f32],
        size: usize,
        num_candidates: usize,
        filters: &Filters,
    ) -> (Value, Value) {
        let clauses = filter_clauses(filters);
        let knn = json!({
            "field": self.vector_field,
            "query_vector": vector,
            "k": size,
            "num_candidates": num_candidates.max(size),
        });

        let mut primary = json!({
            "knn": knn,
            "_source": self.source_filter(),
            "size": size,
        });
        if !clauses.is_empty() {
            primary["filter"] = json!(clauses);
        }

        let query = if clauses.is_empty() {
            json!({"match_all": {}})
        } else {
            json!({"bool": {"filter": clauses}})
        };
        let fallback = json!({
            "query": query,
            "knn": primary["knn"].clone(),
            "_source": self.source_filter(),
            "size": size,
        });

        (primary, fallback)
    }
}

/// `terms` on team and doc type, `range` on `created_at`
fn filter_clauses(filters: &Filters) -> Vec<Value> {
    let mut clauses = Vec::new();
    if let Some(teams) = filters.team.as_ref().filter(|t| !t.is_empty()) {
        clauses.push(json!({"terms": {"team": teams}}));
    }
    if let Some(doc_types) = filters.doc_type.as_ref().filter(|d| !d.is_empty()) {
        clauses.push(json!({"terms": {"doc_type": doc_types}}));
    }
    if let Some(since) = filters.since {
        clauses.push(json!({"range": {"created_at": {"gte": since.to_rfc3339()}}}));
    }
    clauses
}

#[async_trait]
impl LexicalSearch for ElasticBackend {
    async fn search_lexical(&self, query: &str, pool_size: usize, filters: &Filters) -> Result<RankedList> {
        let ladder = self.lexical_ladder(query, pool_size, filters);
        let rungs = ladder.len();

        for (rung, body) in ladder.iter().enumerate() {
            let hits = self.run_search(LEXICAL_PATH, body).await?;
            if !hits.is_empty() || rung + 1 == rungs {
                tracing::debug!(rung, hits = hits.len(), "BM25 query settled");
                return Ok(hits);
            }
        }
        Ok(Vec::new())
    }
}

#[async_trait]
impl VectorSearch for ElasticBackend {
    async fn search_vector(
        &self,
        vector: &[f32],
        pool_size: usize,
        num_candidates: usize,
        filters: &Filters,
    ) -> Result<RankedList> {
        let (primary, fallback) = self.knn_bodies(vector, pool_size, num_candidates, filters);

        match self.run_search(VECTOR_PATH, &primary).await {
            Ok(hits) => Ok(hits),
            Err(e) => {
                tracing::debug!(error = %e, "kNN query rejected, retrying with bool filter");
                self.run_search(VECTOR_PATH, &fallback).await
            }
        }
    }
}

#[async_trait]
impl SearchBackend for ElasticBackend {
    async fn ping(&self) -> Result<()> {
        let response = self
            .authorized(self.client.get(&self.base_url))
            .send()
            .await
            .map_err(|e| AppError::BackendUnavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::BackendUnavailable {
                message: format!("cluster answered HTTP {}", status),
            })
        }
    }
}
