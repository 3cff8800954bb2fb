//! Candidate resolution (URL, redirect, domain) and deduplication.

use crate::redirect;
use crate::shapes::Candidate;
use crate::urlnorm;
use groundgate_core::{CanonicalCitation, SourceType};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// Parse a URL, tolerating a missing scheme on an otherwise domain-like value.
fn parse_lenient(raw: &str) -> Option<Url> {
    if let Some(url) = urlnorm::parse_http(raw) {
        return Some(url);
    }
    let raw = raw.trim();
    if raw.contains("://") {
        return None;
    }
    let host_part = raw.split(['/', '?', '#']).next()?;
    urlnorm::looks_like_domain(host_part)?;
    urlnorm::parse_http(&format!("https://{raw}"))
}

/// Domain from secondary fields: nested `web.uri`, title-as-domain, then
/// sibling `domain`/`host` fields.
fn secondary_domain(c: &Candidate) -> Option<String> {
    if let Some(nested) = c.nested_uri.as_deref().and_then(urlnorm::parse_http) {
        if !redirect::is_redirect(&nested) {
            if let Some(host) = urlnorm::host(&nested) {
                return Some(urlnorm::registrable_domain(&host));
            }
        }
    }
    if let Some(d) = c.title.as_deref().and_then(urlnorm::looks_like_domain) {
        return Some(d);
    }
    c.domain_fields.iter().find_map(|f| {
        urlnorm::looks_like_domain(f).or_else(|| urlnorm::domain_of(f))
    })
}

/// Tag a raw payload with redirect provenance.
fn tag_redirect(raw: Value, wrapper: &str) -> Value {
    let mut obj = match raw {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".into(), other);
            map
        }
    };
    obj.insert("redirect".into(), Value::Bool(true));
    obj.insert("redirect_url".into(), Value::String(wrapper.to_string()));
    Value::Object(obj)
}

/// Turn a candidate into a citation, or drop it when no domain can be
/// derived. `rank` is assigned later by [`dedup`].
pub fn resolve(c: Candidate, source: &str) -> Option<CanonicalCitation> {
    let parsed = c
        .url
        .as_deref()
        .and_then(parse_lenient)
        .or_else(|| c.nested_uri.as_deref().and_then(urlnorm::parse_http));

    let (url, source_domain, raw) = match parsed {
        Some(u) if redirect::is_redirect(&u) => {
            let wrapper = u.as_str().to_string();
            match redirect::embedded_target(&u) {
                Some(target) => {
                    let domain = urlnorm::host(&target).map(|h| urlnorm::registrable_domain(&h));
                    (target.to_string(), domain, tag_redirect(c.raw.clone(), &wrapper))
                }
                None => {
                    let domain = secondary_domain(&c)
                        .or_else(|| urlnorm::host(&u).map(|h| urlnorm::registrable_domain(&h)));
                    (wrapper.clone(), domain, tag_redirect(c.raw.clone(), &wrapper))
                }
            }
        }
        Some(u) => {
            let domain = urlnorm::host(&u).map(|h| urlnorm::registrable_domain(&h));
            let url = match c.url.as_deref().map(str::trim) {
                Some(original) if urlnorm::parse_http(original).is_some() => original.to_string(),
                _ => u.to_string(),
            };
            (url, domain, c.raw.clone())
        }
        None => (String::new(), secondary_domain(&c), c.raw.clone()),
    };

    let source_domain = source_domain.filter(|d| !d.is_empty())?;
    Some(CanonicalCitation {
        source: source.to_string(),
        url,
        source_domain,
        title: c.title,
        snippet: c.snippet,
        source_type: c.source_type,
        rank: 0,
        raw,
    })
}

fn dedup_key(c: &CanonicalCitation) -> String {
    if c.url.is_empty() {
        format!("domain:{}", c.source_domain)
    } else {
        urlnorm::dedup_key(&c.url)
    }
}

/// Collapse duplicates by normalized URL, keeping the earliest entry.
///
/// A later anchored duplicate upgrades an earlier unlinked entry so that
/// anchoring is never lost to ordering. Ranks are assigned 1..=n.
pub fn dedup(citations: Vec<CanonicalCitation>) -> Vec<CanonicalCitation> {
    let mut out: Vec<CanonicalCitation> = Vec::with_capacity(citations.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for c in citations {
        let key = dedup_key(&c);
        if let Some(&i) = seen.get(&key) {
            let kept = &mut out[i];
            if c.source_type == SourceType::Anchored && kept.source_type != SourceType::Anchored {
                kept.source_type = SourceType::Anchored;
                if c.snippet.is_some() {
                    kept.snippet = c.snippet;
                }
            }
            if kept.title.is_none() {
                kept.title = c.title;
            }
            continue;
        }
        seen.insert(key, out.len());
        out.push(c);
    }

    for (i, c) in out.iter_mut().enumerate() {
        c.rank = i as u32 + 1;
    }
    out
}
