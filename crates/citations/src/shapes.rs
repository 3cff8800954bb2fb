//! Evidence shapes and their extractors.
//!
//! Each [`Shape`] knows how to pull [`Candidate`]s out of the JSON node a
//! rule path resolved to. Candidates are unresolved: URL and domain
//! resolution (redirects included) happens afterwards in one place.

use crate::path::{get, get_any, get_str, items};
use groundgate_core::SourceType;
use serde_json::Value;
use std::collections::HashMap;

const URL_FIELDS: &[&str] = &["url", "uri", "link", "href", "source_url"];
const TITLE_FIELDS: &[&str] = &["title", "name", "source_title"];
const SNIPPET_FIELDS: &[&str] = &[
    "cited_text",
    "snippet",
    "text",
    "excerpt",
    "content",
    "description",
];
const DOMAIN_FIELDS: &[&str] = &["domain", "host", "hostname", "source_domain", "site"];
const ANCHOR_FIELDS: &[&str] = &[
    "start_index",
    "end_index",
    "segment",
    "cited_text",
    "start_char_index",
];
const ID_FIELDS: &[&str] = &["source_id", "id", "index", "source"];

/// One unresolved piece of evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: Option<String>,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source_type: SourceType,
    /// A nested `web.uri` next to the primary URL.
    pub nested_uri: Option<String>,
    /// Sibling `domain` / `host` style fields.
    pub domain_fields: Vec<String>,
    pub raw: Value,
}

impl Candidate {
    /// A candidate carrying only a URL.
    pub fn from_url(url: &str, source_type: SourceType, raw: Value) -> Self {
        Self {
            url: Some(url.trim().to_string()),
            title: None,
            snippet: None,
            source_type,
            nested_uri: None,
            domain_fields: Vec::new(),
            raw,
        }
    }

    /// Whether anything here could lead to a URL or a domain.
    fn is_locatable(&self) -> bool {
        self.url.is_some()
            || self.nested_uri.is_some()
            || !self.domain_fields.is_empty()
            || self.title.is_some()
    }
}

/// Build a candidate from a citation-like object or a bare URL string.
///
/// Returns `None` when the entry has nothing locatable, e.g. an id-only
/// reference that needs a JOIN.
pub fn candidate_from(value: &Value, source_type: SourceType) -> Option<Candidate> {
    if let Some(s) = value.as_str() {
        let s = s.trim();
        return (!s.is_empty()).then(|| Candidate::from_url(s, source_type, value.clone()));
    }
    if !value.is_object() {
        return None;
    }

    // Gemini nests the location under `web`, some SDKs under `source`.
    let nested = get_any(value, &["web", "retrieved_context", "source"]).filter(|v| v.is_object());
    let body = match (get_str(value, URL_FIELDS), nested) {
        (None, Some(inner)) => inner,
        _ => value,
    };

    let url = get_str(body, URL_FIELDS).map(str::to_string);
    let nested_uri = nested
        .and_then(|n| get_str(n, URL_FIELDS))
        .filter(|u| Some(*u) != url.as_deref())
        .map(str::to_string);
    let title = get_str(body, TITLE_FIELDS)
        .or_else(|| get_str(value, TITLE_FIELDS))
        .map(str::to_string);
    let snippet = get_str(value, SNIPPET_FIELDS)
        .or_else(|| get_str(body, SNIPPET_FIELDS))
        .map(str::to_string);
    let mut domain_fields: Vec<String> = Vec::new();
    for src in [body, value] {
        for name in DOMAIN_FIELDS {
            if let Some(d) = get(src, name).and_then(Value::as_str) {
                let d = d.trim();
                if !d.is_empty() && !domain_fields.iter().any(|x| x == d) {
                    domain_fields.push(d.to_string());
                }
            }
        }
    }

    let candidate = Candidate {
        url,
        title,
        snippet,
        source_type,
        nested_uri,
        domain_fields,
        raw: value.clone(),
    };
    candidate.is_locatable().then_some(candidate)
}

/// Whether the backend tied this entry to a span of the answer.
pub fn has_anchor(value: &Value) -> bool {
    ANCHOR_FIELDS.iter().any(|f| get(value, f).is_some())
}

fn type_is(value: &Value, expected: &[&str]) -> bool {
    match get_str(value, &["type"]) {
        Some(t) => expected.contains(&t),
        None => true,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The evidence layouts the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// OpenAI Responses `url_citation` annotations on output text.
    ResponsesAnnotations,
    /// Chat-completions annotations with a nested `url_citation` object.
    ChatAnnotations,
    /// Bare source lists (web-search-call `action.sources`, generic `sources`).
    SourceList,
    /// Anthropic text-block `citations`.
    AnthropicTextCitations,
    /// Anthropic `web_search_tool_result` content blocks.
    AnthropicSearchResults,
    /// Gemini `groundingChunks` joined through `groundingSupports`.
    GroundingMetadata,
    /// `groundingAttributions` entries.
    GroundingAttributions,
    /// Generic `citations`: URL strings or objects.
    Citations,
    /// A `cited_sources` table joined by id from `citations` entries.
    CitedSources,
    /// `supporting_content` passages.
    SupportingContent,
    /// Search-result listings.
    SearchResults,
    /// Candidate-level `citationMetadata`.
    CitationMetadata,
}

impl Shape {
    /// Append every candidate found in `node`.
    pub fn extract(self, node: &Value, out: &mut Vec<Candidate>) {
        match self {
            Self::ResponsesAnnotations => {
                out.extend(
                    items(node)
                        .filter(|a| type_is(a, &["url_citation"]))
                        .filter_map(|a| candidate_from(a, SourceType::Anchored)),
                );
            }
            Self::ChatAnnotations => {
                for a in items(node).filter(|a| type_is(a, &["url_citation"])) {
                    let inner = get(a, "url_citation").unwrap_or(a);
                    if let Some(mut c) = candidate_from(inner, SourceType::Anchored) {
                        c.raw = a.clone();
                        out.push(c);
                    }
                }
            }
            Self::SourceList | Self::SupportingContent | Self::SearchResults => {
                out.extend(items(node).filter_map(|s| candidate_from(s, SourceType::Unlinked)));
            }
            Self::AnthropicTextCitations => {
                out.extend(
                    items(node)
                        .filter(|c| {
                            type_is(c, &["web_search_result_location", "search_result_location"])
                        })
                        .filter_map(|c| candidate_from(c, SourceType::Anchored)),
                );
            }
            Self::AnthropicSearchResults => {
                for block in items(node).filter(|b| {
                    get_str(b, &["type"]) == Some("web_search_tool_result")
                }) {
                    let Some(results) = get(block, "content") else {
                        continue;
                    };
                    out.extend(
                        items(results)
                            .filter(|r| type_is(r, &["web_search_result"]))
                            .filter_map(|r| candidate_from(r, SourceType::Unlinked)),
                    );
                }
            }
            Self::GroundingMetadata => extract_grounding_metadata(node, out),
            Self::GroundingAttributions => {
                for attr in items(node) {
                    if let Some(mut c) = candidate_from(attr, SourceType::Anchored) {
                        if c.snippet.is_none() {
                            c.snippet = attribution_text(attr);
                        }
                        out.push(c);
                    }
                }
            }
            Self::Citations => {
                for entry in items(node) {
                    let source_type = if has_anchor(entry) {
                        SourceType::Anchored
                    } else {
                        SourceType::Unlinked
                    };
                    if let Some(c) = candidate_from(entry, source_type) {
                        out.push(c);
                    }
                }
            }
            Self::CitedSources => extract_cited_sources(node, out),
            Self::CitationMetadata => {
                let Some(list) = get_any(node, &["citations", "citation_sources"]) else {
                    return;
                };
                for entry in items(list) {
                    let source_type = if has_anchor(entry) {
                        SourceType::Anchored
                    } else {
                        SourceType::Unlinked
                    };
                    if let Some(c) = candidate_from(entry, source_type) {
                        out.push(c);
                    }
                }
            }
        }
    }
}

fn attribution_text(attr: &Value) -> Option<String> {
    let content = get(attr, "content")?;
    let parts = get(content, "parts")?;
    items(parts)
        .find_map(|p| get_str(p, &["text"]))
        .map(str::to_string)
}

/// Gemini grounding: chunks referenced by a support are anchored (in support
/// order, with the supported segment as snippet); the rest are unlinked.
fn extract_grounding_metadata(node: &Value, out: &mut Vec<Candidate>) {
    let Some(chunks) = get(node, "grounding_chunks").and_then(Value::as_array) else {
        return;
    };

    let mut referenced: Vec<(usize, Option<String>)> = Vec::new();
    if let Some(supports) = get(node, "grounding_supports") {
        for support in items(supports) {
            let segment_text = get(support, "segment")
                .and_then(|s| get_str(s, &["text"]))
                .map(str::to_string);
            let Some(indices) = get(support, "grounding_chunk_indices") else {
                continue;
            };
            for idx in items(indices).filter_map(Value::as_u64) {
                let idx = idx as usize;
                if idx < chunks.len() && !referenced.iter().any(|(i, _)| *i == idx) {
                    referenced.push((idx, segment_text.clone()));
                }
            }
        }
    }

    for (idx, segment) in &referenced {
        if let Some(mut c) = candidate_from(&chunks[*idx], SourceType::Anchored) {
            if c.snippet.is_none() {
                c.snippet = segment.clone();
            }
            out.push(c);
        }
    }
    for (idx, chunk) in chunks.iter().enumerate() {
        if referenced.iter().any(|(i, _)| *i == idx) {
            continue;
        }
        if let Some(c) = candidate_from(chunk, SourceType::Unlinked) {
            out.push(c);
        }
    }
}

/// JOIN `citations[*].source_id` against `cited_sources[*].id`.
///
/// Referenced sources become anchored candidates; unreferenced ones are
/// still reported as unlinked.
fn extract_cited_sources(container: &Value, out: &mut Vec<Candidate>) {
    let Some(sources) = get(container, "cited_sources") else {
        return;
    };
    let sources: Vec<&Value> = items(sources).collect();
    let by_id: HashMap<String, usize> = sources
        .iter()
        .enumerate()
        .filter_map(|(i, s)| get_any(s, ID_FIELDS).and_then(id_string).map(|id| (id, i)))
        .collect();

    let mut used = vec![false; sources.len()];
    if let Some(citations) = get(container, "citations") {
        for citation in items(citations).filter(|c| c.is_object()) {
            let joined = get_any(citation, ID_FIELDS)
                .and_then(id_string)
                .and_then(|id| by_id.get(&id).copied());
            let Some(i) = joined else {
                continue;
            };
            if let Some(mut c) = candidate_from(sources[i], SourceType::Anchored) {
                if let Some(text) = get_str(citation, SNIPPET_FIELDS) {
                    c.snippet = Some(text.to_string());
                }
                c.raw = serde_json::json!({ "citation": citation, "source": sources[i] });
                out.push(c);
                used[i] = true;
            }
        }
    }

    for (i, source) in sources.iter().enumerate() {
        if used[i] {
            continue;
        }
        if let Some(c) = candidate_from(source, SourceType::Unlinked) {
            out.push(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(shape: Shape, node: Value) -> Vec<Candidate> {
        let mut out = Vec::new();
        shape.extract(&node, &mut out);
        out
    }

    #[test]
    fn id_only_entries_are_not_locatable() {
        assert!(candidate_from(&json!({ "source_id": 3 }), SourceType::Anchored).is_none());
        assert!(candidate_from(&json!(""), SourceType::Unlinked).is_none());
        assert!(candidate_from(&json!(42), SourceType::Unlinked).is_none());
    }

    #[test]
    fn nested_web_object_is_the_body() {
        let c = candidate_from(
            &json!({ "web": { "uri": "https://example.com/a", "title": "example.com" } }),
            SourceType::Unlinked,
        )
        .unwrap();
        assert_eq!(c.url.as_deref(), Some("https://example.com/a"));
        assert_eq!(c.title.as_deref(), Some("example.com"));
        assert!(c.nested_uri.is_none());
    }

    #[test]
    fn chat_annotations_unwrap_inner_object() {
        let found = run(
            Shape::ChatAnnotations,
            json!([
                { "type": "url_citation", "url_citation": {
                    "url": "https://a.example/x", "title": "A", "start_index": 0, "end_index": 10 } },
                { "type": "file_citation", "file_id": "f1" }
            ]),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_type, SourceType::Anchored);
        assert_eq!(found[0].title.as_deref(), Some("A"));
    }

    #[test]
    fn grounding_supports_anchor_referenced_chunks() {
        let found = run(
            Shape::GroundingMetadata,
            json!({
                "groundingChunks": [
                    { "web": { "uri": "https://one.example", "title": "one.example" } },
                    { "web": { "uri": "https://two.example", "title": "two.example" } },
                    { "web": { "uri": "https://three.example", "title": "three.example" } }
                ],
                "groundingSupports": [
                    { "segment": { "text": "second claim" }, "groundingChunkIndices": [1, 9] }
                ]
            }),
        );
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].url.as_deref(), Some("https://two.example"));
        assert_eq!(found[0].source_type, SourceType::Anchored);
        assert_eq!(found[0].snippet.as_deref(), Some("second claim"));
        assert!(found[1..].iter().all(|c| c.source_type == SourceType::Unlinked));
    }

    #[test]
    fn cited_sources_join_by_id() {
        let found = run(
            Shape::CitedSources,
            json!({
                "cited_sources": [
                    { "id": "s1", "url": "https://one.example/a", "title": "One" },
                    { "id": "s2", "url": "https://two.example/b", "title": "Two" }
                ],
                "citations": [
                    { "source_id": "s2", "text": "claim about two" },
                    { "source_id": "missing" }
                ]
            }),
        );
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].url.as_deref(), Some("https://two.example/b"));
        assert_eq!(found[0].source_type, SourceType::Anchored);
        assert_eq!(found[0].snippet.as_deref(), Some("claim about two"));
        assert_eq!(found[1].url.as_deref(), Some("https://one.example/a"));
        assert_eq!(found[1].source_type, SourceType::Unlinked);
    }

    #[test]
    fn generic_citations_mix_strings_and_objects() {
        let found = run(
            Shape::Citations,
            json!([
                "https://plain.example",
                { "url": "https://spanned.example", "start_index": 4, "end_index": 9 },
                { "source_id": 1 }
            ]),
        );
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].source_type, SourceType::Unlinked);
        assert_eq!(found[1].source_type, SourceType::Anchored);
    }

    #[test]
    fn anthropic_search_results_skip_other_blocks() {
        let found = run(
            Shape::AnthropicSearchResults,
            json!([
                { "type": "text", "text": "hello" },
                { "type": "web_search_tool_result", "content": [
                    { "type": "web_search_result", "url": "https://r.example", "title": "R" }
                ]},
                { "type": "web_search_tool_result", "content": {
                    "type": "web_search_tool_result_error", "error_code": "unavailable" } }
            ]),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_type, SourceType::Unlinked);
    }

    #[test]
    fn attribution_text_fills_snippet() {
        let found = run(
            Shape::GroundingAttributions,
            json!([{
                "sourceId": { "groundingPassage": { "passageId": "p1" } },
                "web": { "uri": "https://attr.example", "title": "Attr" },
                "content": { "parts": [{ "text": "attributed passage" }] }
            }]),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].snippet.as_deref(), Some("attributed passage"));
        assert_eq!(found[0].source_type, SourceType::Anchored);
    }

    #[test]
    fn domain_fields_are_collected() {
        let c = candidate_from(
            &json!({ "url": "https://vertexaisearch.cloud.google.com/r/1", "domain": "lemonde.fr" }),
            SourceType::Unlinked,
        )
        .unwrap();
        assert_eq!(c.domain_fields, vec!["lemonde.fr".to_string()]);
    }
}
