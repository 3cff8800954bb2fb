//! The canonical response and citation records.

use serde::{Deserialize, Serialize};

/// How a citation relates to the answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// The backend tied this citation to a span of the answer.
    Anchored,
    /// Supporting evidence with no text anchor.
    Unlinked,
    /// URL recovered by scanning the answer text.
    TextHarvest,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anchored => "anchored",
            Self::Unlinked => "unlinked",
            Self::TextHarvest => "text_harvest",
        }
    }

    /// Only anchored citations count toward an evidence-required contract.
    pub fn satisfies_required(self) -> bool {
        matches!(self, Self::Anchored)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized evidence item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCitation {
    /// Backend name that produced the evidence.
    pub source: String,
    /// End-site URL when known, otherwise the redirect wrapper.
    pub url: String,
    /// Registrable domain; never empty.
    pub source_domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub source_type: SourceType,
    /// 1-based position after deduplication.
    pub rank: u32,
    /// Original payload, kept for forensics.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Why a call that asked for evidence ended up without usable evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhyNotGrounded {
    /// The backend never invoked an evidence tool.
    ToolNotInvoked,
    /// Tools ran but nothing anchored came back.
    ToolsInvokedNoAnchoredEvidence,
    /// The backend cannot honor an evidence requirement at all.
    BackendDoesNotSupportRequired,
}

impl WhyNotGrounded {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolNotInvoked => "tool_not_invoked",
            Self::ToolsInvokedNoAnchoredEvidence => "tools_invoked_no_anchored_evidence",
            Self::BackendDoesNotSupportRequired => "backend_does_not_support_required",
        }
    }
}

impl std::fmt::Display for WhyNotGrounded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Sum of two usages (two-step calls report both round trips).
    pub fn combined(self, other: TokenUsage) -> Self {
        Self::new(
            self.input_tokens + other.input_tokens,
            self.output_tokens + other.output_tokens,
        )
    }
}

/// Provenance of the reshape step in the grounded-then-reshape protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step2Record {
    /// Always false: the reshape step never gathers evidence.
    pub step2_tools_invoked: bool,
    /// SHA-256 of step 1's grounded text.
    pub step2_source_ref: String,
}

/// Emitted when the admission controller shrank the output budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimNotice {
    pub requested_output_tokens: u32,
    pub granted_output_tokens: u32,
    pub remaining_budget: u64,
}

/// The canonical, backend-independent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    /// Final answer text (the reshaped text for two-step calls).
    pub text: String,
    /// Parsed structured output, when a schema was requested and the text is JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<serde_json::Value>,
    /// Did the backend actually produce usable evidence.
    pub evidence_effective: bool,
    pub citations: Vec<CanonicalCitation>,
    /// Transport path that served the call.
    pub backend_api_used: String,
    pub backend: String,
    pub model: String,
    pub usage: TokenUsage,
    /// Evidence tool invocations the backend reported.
    pub tool_calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_not_grounded: Option<WhyNotGrounded>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step2: Option<Step2Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_notice: Option<TrimNotice>,
    #[serde(default)]
    pub finalized_after_deadline: bool,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CanonicalResponse {
    /// Number of citations of the given type.
    pub fn count(&self, source_type: SourceType) -> usize {
        self.citations
            .iter()
            .filter(|c| c.source_type == source_type)
            .count()
    }

    pub fn anchored_count(&self) -> usize {
        self.count(SourceType::Anchored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(source_type: SourceType) -> CanonicalCitation {
        CanonicalCitation {
            source: "gemini".into(),
            url: "https://example.com/a".into(),
            source_domain: "example.com".into(),
            title: None,
            snippet: None,
            source_type,
            rank: 1,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn only_anchored_satisfies_required() {
        assert!(SourceType::Anchored.satisfies_required());
        assert!(!SourceType::Unlinked.satisfies_required());
        assert!(!SourceType::TextHarvest.satisfies_required());
    }

    #[test]
    fn reason_codes_serialize_snake_case() {
        let json = serde_json::to_string(&WhyNotGrounded::ToolsInvokedNoAnchoredEvidence).unwrap();
        assert_eq!(json, "\"tools_invoked_no_anchored_evidence\"");
        assert_eq!(
            WhyNotGrounded::BackendDoesNotSupportRequired.to_string(),
            "backend_does_not_support_required"
        );
        assert_eq!(
            serde_json::to_string(&SourceType::TextHarvest).unwrap(),
            "\"text_harvest\""
        );
    }

    #[test]
    fn usage_combines() {
        let u = TokenUsage::new(10, 5).combined(TokenUsage::new(20, 7));
        assert_eq!(u, TokenUsage::new(30, 12));
        assert_eq!(u.total_tokens, 42);
    }

    #[test]
    fn counts_by_type() {
        let resp = CanonicalResponse {
            text: String::new(),
            structured_output: None,
            evidence_effective: true,
            citations: vec![
                citation(SourceType::Anchored),
                citation(SourceType::Unlinked),
                citation(SourceType::Unlinked),
            ],
            backend_api_used: "gemini.generate_content".into(),
            backend: "gemini".into(),
            model: "gemini-2.0-flash".into(),
            usage: TokenUsage::default(),
            tool_calls: 1,
            why_not_grounded: None,
            step2: None,
            trim_notice: None,
            finalized_after_deadline: false,
            metadata: serde_json::Map::new(),
        };
        assert_eq!(resp.anchored_count(), 1);
        assert_eq!(resp.count(SourceType::Unlinked), 2);
        assert_eq!(resp.count(SourceType::TextHarvest), 0);
    }
}
