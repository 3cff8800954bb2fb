//! Backend-owned redirect wrappers.
//!
//! Some backends hand out click-through URLs on their own infrastructure
//! instead of the end-site URL. These are still evidence: the engine keeps
//! them, unwraps an embedded target when one is present, and otherwise
//! leans on secondary fields to find the real domain.

use crate::urlnorm;
use url::Url;

/// Hosts whose URLs are opaque grounding redirects.
const REDIRECT_HOSTS: &[&str] = &[
    "vertexaisearch.cloud.google.com",
    "grounding.googleapis.com",
    "r.search.yahoo.com",
];

/// (host suffix, path prefix) pairs for search-engine click wrappers.
const REDIRECT_PATHS: &[(&str, &str)] = &[
    ("google.com", "/url"),
    ("bing.com", "/ck/"),
    ("duckduckgo.com", "/l/"),
];

/// Query parameters that carry the wrapped target.
const TARGET_PARAMS: &[&str] = &["url", "q", "u", "uddg", "target", "dest"];

/// Whether `url` is a redirect wrapper rather than an end-site URL.
pub fn is_redirect(url: &Url) -> bool {
    let Some(host) = urlnorm::host(url) else {
        return false;
    };
    if REDIRECT_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    {
        return true;
    }
    let path = url.path().to_ascii_lowercase();
    REDIRECT_PATHS.iter().any(|(suffix, prefix)| {
        (host == *suffix || host.ends_with(&format!(".{suffix}"))) && path.starts_with(prefix)
    })
}

/// The end-site URL embedded in a wrapper's query string, if any.
pub fn embedded_target(url: &Url) -> Option<Url> {
    url.query_pairs()
        .filter(|(k, _)| TARGET_PARAMS.contains(&k.to_ascii_lowercase().as_str()))
        .filter_map(|(_, v)| urlnorm::parse_http(&v))
        .find(|target| !is_redirect(target))
}
