//! SearchSphere retrieval core
//!
//! Hybrid BM25/kNN retrieval with Reciprocal Rank Fusion, hit normalization
//! and Precision@K evaluation.

pub mod demo;
pub mod eval;
pub mod normalize;
pub mod retrieval;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use normalize::Candidate;
pub use retrieval::{
    ElasticBackend, EvalOutcome, EvalRequest, Filters, HybridRetriever, LabelOutcome,
    LabelRequest, RawHit, RetrievalMode, SearchBackend, SearchOutcome, SearchQuery,
};
