//! Fixed illustrative results served when a search comes back empty and the
//! demo fallback is switched on.

use crate::retrieval::{RawHit, SourceFields};

fn demo_hit(id: &str, title: &str, url: &str, text: &str, team: &str, doc_type: &str) -> RawHit {
    RawHit::new(
        id,
        SourceFields {
            title: Some(title.to_string()),
            url: Some(url.to_string()),
            text: Some(text.to_string()),
            team: Some(team.to_string()),
            doc_type: Some(doc_type.to_string()),
            ..Default::default()
        },
    )
}

/// The demo set, in display order
pub fn demo_hits() -> Vec<RawHit> {
    vec![
        demo_hit(
            "demo1",
            "FinOps Optimization Overview",
            "https://example.com/finops",
            "A quick overview of hybrid search and cost optimization patterns with Elastic and Vertex AI.",
            "finops",
            "guide",
        ),
        demo_hit(
            "demo2",
            "Elastic + Vertex AI Hybrid RAG",
            "https://example.com/rag",
            "How BM25 and kNN embeddings fuse via Reciprocal Rank Fusion to improve recall and precision.",
            "research",
            "pdf",
        ),
    ]
}
