//! Last-resort URL harvesting from answer text.

use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Characters that end a URL in prose but are rarely part of one.
const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '"', '\'', '*', '>'];

fn url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"https?://[^\s<>"'`()\[\]{}]+"#).ok())
        .as_ref()
}

/// Pull up to `limit` distinct URL-shaped substrings out of `text`,
/// stopping early once `budget` has elapsed.
pub fn harvest_urls(text: &str, limit: usize, budget: Duration) -> Vec<String> {
    let started = Instant::now();
    let mut urls: Vec<String> = Vec::new();
    let Some(pattern) = url_pattern() else {
        return urls;
    };
    for m in pattern.find_iter(text) {
        if urls.len() >= limit || started.elapsed() > budget {
            break;
        }
        let trimmed = m.as_str().trim_end_matches(TRAILING);
        if trimmed.len() <= "https://".len() {
            continue;
        }
        if urls.iter().any(|existing| existing == trimmed) {
            continue;
        }
        urls.push(trimmed.to_string());
    }
    if urls.len() >= limit {
        tracing::debug!(limit, "text harvest hit its URL cap");
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: Duration = Duration::from_millis(50);

    #[test]
    fn finds_urls_in_prose_and_markdown() {
        let text = "See https://example.com/a, and [docs](https://docs.example.org/guide). \
                    Also (https://third.example/x?y=1).";
        assert_eq!(
            harvest_urls(text, 8, BUDGET),
            vec![
                "https://example.com/a",
                "https://docs.example.org/guide",
                "https://third.example/x?y=1",
            ]
        );
    }

    #[test]
    fn caps_at_limit_and_dedups() {
        let text = (0..20)
            .map(|i| format!("https://site{i}.example/ https://site0.example/"))
            .collect::<Vec<_>>()
            .join(" ");
        let urls = harvest_urls(&text, 8, BUDGET);
        assert_eq!(urls.len(), 8);
        assert_eq!(urls.iter().filter(|u| *u == "https://site0.example/").count(), 1);
    }

    #[test]
    fn ignores_bare_schemes_and_plain_text() {
        assert!(harvest_urls("nothing to see at http:// here", 8, BUDGET).is_empty());
        assert!(harvest_urls("no links at all", 8, BUDGET).is_empty());
    }

    #[test]
    fn zero_budget_stops_immediately() {
        let urls = harvest_urls("https://a.example https://b.example", 8, Duration::ZERO);
        assert!(urls.len() <= 1);
    }
}
