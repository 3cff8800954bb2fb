//! Loose dotted-path lookup over JSON.
//!
//! Backend SDKs disagree between versions on key spelling, so every key is
//! compared in a compact form: lowercase with `_`, `-` and spaces removed.
//! `groundingMetadata`, `grounding_metadata` and `grounding metadata` all
//! match the same segment. A `*` segment flattens arrays.

use serde_json::Value;

/// Lowercase `key` and drop word separators.
pub fn compact_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Look up `name` in an object, matching keys loosely.
pub fn get<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    let obj = value.as_object()?;
    if let Some(v) = obj.get(name) {
        return Some(v);
    }
    let wanted = compact_key(name);
    obj.iter()
        .find(|(k, _)| compact_key(k) == wanted)
        .map(|(_, v)| v)
}

/// First of `names` present as a non-empty string.
pub fn get_str<'a>(value: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|n| get(value, n))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// First of `names` that is present and not null.
pub fn get_any<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| get(value, n))
        .find(|v| !v.is_null())
}

/// Iterate a node as a list: arrays yield their elements, anything else
/// yields itself (SDKs sometimes collapse single-element arrays).
pub fn items(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(a) => Box::new(a.iter()),
        Value::Null => Box::new(std::iter::empty()),
        other => Box::new(std::iter::once(other)),
    }
}

/// Resolve a dotted path to every node it reaches.
///
/// The empty path resolves to the root.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![root];
    if path.is_empty() {
        return current;
    }
    for segment in path.split('.') {
        let mut next = Vec::new();
        for node in current {
            if segment == "*" {
                next.extend(items(node));
            } else if let Some(child) = get(node, segment) {
                next.push(child);
            }
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current.retain(|v| !v.is_null());
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compact_forms_match() {
        assert_eq!(compact_key("groundingMetadata"), "groundingmetadata");
        assert_eq!(compact_key("grounding_metadata"), "groundingmetadata");
        assert_eq!(compact_key("Grounding Metadata"), "groundingmetadata");
        assert_eq!(compact_key("cited-sources"), "citedsources");
    }

    #[test]
    fn resolves_through_arrays_and_spellings() {
        let body = json!({
            "candidates": [
                { "grounding_metadata": { "n": 1 } },
                { "groundingMetadata": { "n": 2 } },
                { "other": true }
            ]
        });
        let hits = resolve(&body, "candidates.*.groundingMetadata");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["n"], 1);
        assert_eq!(hits[1]["n"], 2);
    }

    #[test]
    fn missing_path_resolves_to_nothing() {
        let body = json!({ "choices": [] });
        assert!(resolve(&body, "choices.*.message.annotations").is_empty());
        assert!(resolve(&json!(null), "anything").is_empty());
    }

    #[test]
    fn empty_path_is_root() {
        let body = json!({ "a": 1 });
        assert_eq!(resolve(&body, ""), vec![&body]);
    }

    #[test]
    fn get_str_skips_blank_values() {
        let v = json!({ "url": "  ", "uri": "https://a.example/x" });
        assert_eq!(get_str(&v, &["url", "uri"]), Some("https://a.example/x"));
        assert_eq!(get_str(&v, &["link"]), None);
    }

    #[test]
    fn items_treats_scalars_as_single_element() {
        let obj = json!({ "url": "x" });
        assert_eq!(items(&obj).count(), 1);
        assert_eq!(items(&json!([1, 2, 3])).count(), 3);
        assert_eq!(items(&Value::Null).count(), 0);
    }
}
