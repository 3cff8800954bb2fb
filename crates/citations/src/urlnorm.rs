//! URL parsing, dedup keys, and registrable-domain derivation.

use url::Url;

/// Query parameters that only track clicks and never change the target.
const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "msclkid", "mc_cid", "mc_eid", "ref_src"];

/// Parse an absolute http(s) URL with a host.
pub fn parse_http(raw: &str) -> Option<Url> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str().filter(|h| !h.is_empty())?;
    Some(parsed)
}

/// Lowercased host of `url`, without a trailing dot.
pub fn host(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim().trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// Registrable domain for `host`: the public suffix plus one label,
/// per the Public Suffix List (private registries such as `blogspot.com`
/// included). IP literals and bare suffixes are returned unchanged.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }
    psl::domain_str(&host).map_or(host.clone(), str::to_string)
}

/// Registrable domain of a raw URL string.
pub fn domain_of(raw: &str) -> Option<String> {
    let parsed = parse_http(raw)?;
    host(&parsed).map(|h| registrable_domain(&h))
}

/// Interpret free text (typically a title) as a bare domain name.
///
/// Accepts `example.com` and `www.example.co.uk`; rejects anything with
/// spaces, a path, or a non-alphabetic top-level label.
pub fn looks_like_domain(text: &str) -> Option<String> {
    let candidate = text.trim().trim_end_matches('.').to_ascii_lowercase();
    if candidate.is_empty() || candidate.len() > 253 || !candidate.contains('.') {
        return None;
    }
    let labels: Vec<&str> = candidate.split('.').collect();
    let valid_label = |l: &&str| {
        !l.is_empty()
            && l.len() <= 63
            && !l.starts_with('-')
            && !l.ends_with('-')
            && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !labels.iter().all(valid_label) {
        return None;
    }
    let tld = labels.last()?;
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(registrable_domain(&candidate))
}

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Comparison key for deduplication.
///
/// Drops tracking parameters and the fragment, lowercases the host, strips
/// default ports and a trailing slash. Unparseable input is compared as
/// trimmed lowercase text.
pub fn dedup_key(raw: &str) -> String {
    let Some(mut parsed) = parse_http(raw) else {
        return raw.trim().trim_end_matches('/').to_ascii_lowercase();
    };
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }

    let host = host(&parsed).unwrap_or_default();
    let port = parsed
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    let path = parsed.path().trim_end_matches('/');
    let query = parsed.query().map(|q| format!("?{q}")).unwrap_or_default();
    format!("{}://{host}{port}{path}{query}", parsed.scheme())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrable_domain_handles_multi_label_suffixes() {
        assert_eq!(registrable_domain("www.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(registrable_domain("news.example.com"), "example.com");
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("WWW.Example.COM."), "example.com");
        assert_eq!(registrable_domain("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn registrable_domain_follows_the_public_suffix_list() {
        assert_eq!(registrable_domain("foo.blogspot.com"), "foo.blogspot.com");
        assert_eq!(registrable_domain("portal.x.gov.in"), "x.gov.in");
        assert_eq!(registrable_domain("www.y.com.vn"), "y.com.vn");
        assert_eq!(registrable_domain("www.lyon.example"), "lyon.example");
        assert_eq!(registrable_domain("co.uk"), "co.uk");
    }

    #[test]
    fn domain_of_rejects_non_http() {
        assert_eq!(domain_of("https://en.wikipedia.org/wiki/Lyon"), Some("wikipedia.org".into()));
        assert_eq!(domain_of("ftp://example.com/file"), None);
        assert_eq!(domain_of("not a url"), None);
    }

    #[test]
    fn titles_as_domains() {
        assert_eq!(looks_like_domain("lemonde.fr"), Some("lemonde.fr".into()));
        assert_eq!(looks_like_domain("www.theguardian.com"), Some("theguardian.com".into()));
        assert_eq!(looks_like_domain("Best bakeries in Lyon"), None);
        assert_eq!(looks_like_domain("version 1.2"), None);
        assert_eq!(looks_like_domain("example.123"), None);
        assert_eq!(looks_like_domain(""), None);
    }

    #[test]
    fn dedup_key_strips_noise() {
        let a = dedup_key("https://Example.com/Article/?utm_source=x&id=7#section");
        let b = dedup_key("https://example.com:443/Article?id=7&gclid=abc");
        assert_eq!(a, b);
        assert_eq!(a, "https://example.com/Article?id=7");
    }

    #[test]
    fn dedup_key_keeps_meaningful_query() {
        assert_ne!(
            dedup_key("https://example.com/a?page=1"),
            dedup_key("https://example.com/a?page=2")
        );
        assert_eq!(dedup_key("https://example.com/"), "https://example.com");
    }
}
