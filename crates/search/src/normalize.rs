//! Candidate normalization
//!
//! Turns a backend hit into the uniform card shape consumed by the UI, the
//! evaluation harness and generation prompts. Never fails.

use crate::retrieval::RawHit;
use serde::{Deserialize, Serialize};

/// Title used when no source field yields one
pub const UNTITLED: &str = "Untitled";

/// Upper bound on `Candidate::text`, in characters
pub const MAX_TEXT_CHARS: usize = 4000;

/// Upper bound on a snippet, highlighted or derived, in characters
pub const SNIPPET_CHARS: usize = 240;

/// A sentence terminator must sit past this offset to end a snippet
pub const MIN_SENTENCE_OFFSET: usize = 60;

/// Highlight fields consulted for the snippet, in priority order
const HIGHLIGHT_FIELDS: [&str; 4] = ["text", "content", "body", "raw"];

/// Normalized, outward-facing search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub text: String,
    pub snippet: String,
    pub team: Option<String>,
    pub doc_type: Option<String>,
}

/// Build the canonical candidate for a hit
pub fn normalize(hit: &RawHit) -> Candidate {
    let src = &hit.source;

    let url = non_empty(src.url.as_deref()).map(str::to_string);
    let title = resolve_title(hit, url.as_deref());
    let text = truncate_chars(
        first_non_empty(&[src.text.as_deref(), src.content.as_deref()]).unwrap_or(""),
        MAX_TEXT_CHARS,
    );
    let snippet = highlight_snippet(hit)
        .map(|fragment| truncate_chars(fragment.trim(), SNIPPET_CHARS))
        .unwrap_or_else(|| derive_snippet(&text));

    Candidate {
        id: hit.id.clone(),
        score: hit.score,
        index: hit.index.clone(),
        title,
        url,
        snippet: snippet.trim().to_string(),
        text,
        team: src.team.clone(),
        doc_type: src.doc_type.clone(),
    }
}

fn resolve_title(hit: &RawHit, url: Option<&str>) -> String {
    let src = &hit.source;
    let title = first_non_empty(&[
        src.title.as_deref(),
        src.page_title.as_deref(),
        src.doc_id.as_deref(),
        url,
    ])
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .unwrap_or(UNTITLED);

    if title == UNTITLED {
        if let Some(derived) = url.and_then(title_from_url) {
            return derived;
        }
    }
    title.to_string()
}

/// `host + path` of a URL, without a bare trailing slash
fn title_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str().unwrap_or("");
    let path = match parsed.path() {
        "/" => "",
        path => path,
    };
    let derived = format!("{}{}", host, path);
    (!derived.is_empty()).then_some(derived)
}

fn highlight_snippet(hit: &RawHit) -> Option<&str> {
    HIGHLIGHT_FIELDS.iter().find_map(|field| {
        hit.highlight
            .get(*field)
            .and_then(|fragments| fragments.first())
            .map(String::as_str)
            .filter(|fragment| !fragment.trim().is_empty())
    })
}

/// First `SNIPPET_CHARS` characters, cut back to the last sentence end when
/// that end lies past `MIN_SENTENCE_OFFSET`.
pub fn derive_snippet(text: &str) -> String {
    let head: Vec<char> = text.chars().take(SNIPPET_CHARS).collect();
    let end = head
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?'))
        .filter(|&pos| pos > MIN_SENTENCE_OFFSET)
        .map_or(head.len(), |pos| pos + 1);
    head[..end].iter().collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

fn first_non_empty<'a>(values: &[Option<&'a str>]) -> Option<&'a str> {
    values.iter().copied().find_map(non_empty)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
