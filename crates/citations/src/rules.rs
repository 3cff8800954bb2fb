//! Declarative (path, shape) rule tables, one per backend family.
//!
//! Order matters: earlier rules rank first and win deduplication, so
//! richer shapes (anchored, titled) come before bare URL lists.

use crate::shapes::Shape;
use groundgate_core::BackendKind;

/// One probe: where to look and how to read what is there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub path: &'static str,
    pub shape: Shape,
}

const fn rule(path: &'static str, shape: Shape) -> Rule {
    Rule { path, shape }
}

const OPENAI: &[Rule] = &[
    rule("output.*.content.*.annotations", Shape::ResponsesAnnotations),
    rule("choices.*.message.annotations", Shape::ChatAnnotations),
    rule("output.*.action.sources", Shape::SourceList),
];

const ANTHROPIC: &[Rule] = &[
    rule("content.*.citations", Shape::AnthropicTextCitations),
    rule("content", Shape::AnthropicSearchResults),
];

const GEMINI: &[Rule] = &[
    rule("candidates.*.groundingMetadata", Shape::GroundingMetadata),
    rule("candidates.*.groundingAttributions", Shape::GroundingAttributions),
    rule("groundingMetadata", Shape::GroundingMetadata),
];

const OPENAI_COMPATIBLE: &[Rule] = &[
    rule("choices.*.message.annotations", Shape::ChatAnnotations),
    rule("", Shape::CitedSources),
    rule("choices.*.message", Shape::CitedSources),
    rule("search_results", Shape::SearchResults),
];

/// Probed for every backend after its own table.
const GENERIC: &[Rule] = &[
    rule("grounding_attributions", Shape::GroundingAttributions),
    rule("citations", Shape::Citations),
    rule("choices.*.message.citations", Shape::Citations),
    rule("supporting_content", Shape::SupportingContent),
    rule("search_results", Shape::SearchResults),
    rule("sources", Shape::SourceList),
];

/// Candidate-level sibling metadata, scanned separately from the tables.
pub const SIBLING: &[Rule] = &[
    rule("candidates.*.citationMetadata", Shape::CitationMetadata),
];

/// Backend-specific rules followed by the generic tail.
pub fn rules_for(kind: BackendKind) -> impl Iterator<Item = &'static Rule> {
    let specific = match kind {
        BackendKind::OpenAi => OPENAI,
        BackendKind::Anthropic => ANTHROPIC,
        BackendKind::Gemini => GEMINI,
        BackendKind::OpenAiCompatible => OPENAI_COMPATIBLE,
    };
    specific.iter().chain(GENERIC.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_kind_gets_the_generic_tail() {
        for kind in [
            BackendKind::OpenAi,
            BackendKind::Anthropic,
            BackendKind::Gemini,
            BackendKind::OpenAiCompatible,
        ] {
            let paths: Vec<_> = rules_for(kind).map(|r| r.path).collect();
            assert!(paths.contains(&"citations"), "{kind} lacks generic citations");
            assert!(paths.contains(&"sources"), "{kind} lacks generic sources");
        }
    }

    #[test]
    fn tables_cover_at_least_nine_shapes() {
        let shapes: HashSet<_> = [OPENAI, ANTHROPIC, GEMINI, OPENAI_COMPATIBLE, GENERIC, SIBLING]
            .iter()
            .flat_map(|t| t.iter().map(|r| format!("{:?}", r.shape)))
            .collect();
        assert!(shapes.len() >= 9, "only {} shapes", shapes.len());
    }

    #[test]
    fn backend_rules_precede_generic_ones() {
        let first = rules_for(BackendKind::Gemini).next().unwrap();
        assert_eq!(first.shape, Shape::GroundingMetadata);
    }
}
