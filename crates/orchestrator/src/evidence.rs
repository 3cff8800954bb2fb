//! Evidence-mode mapping and post-validation.
//!
//! The gateway decides what "grounded" means from what actually came
//! back: tool invocations reported by the backend plus normalized
//! citations. A backend's own notion of "required" tool use is never
//! trusted.

use groundgate_core::{CanonicalCitation, EvidenceMode, ToolChoice, WhyNotGrounded};

/// Tool settings for a grounded round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolPlan {
    pub evidence_tools: bool,
    pub tool_choice: ToolChoice,
}

impl ToolPlan {
    /// Tools fully off: reshape and finalize round trips.
    pub const OFF: ToolPlan = ToolPlan {
        evidence_tools: false,
        tool_choice: ToolChoice::None,
    };

    /// `auto` and `required` both attach tools with `tool_choice = auto`.
    pub fn for_mode(mode: EvidenceMode) -> Self {
        if mode.gathers_evidence() {
            Self {
                evidence_tools: true,
                tool_choice: ToolChoice::Auto,
            }
        } else {
            Self::OFF
        }
    }
}

/// What the evidence actually amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub evidence_effective: bool,
    pub why_not_grounded: Option<WhyNotGrounded>,
    /// Set when a `required` call must fail closed.
    pub required_failure: Option<WhyNotGrounded>,
}

/// Judge the grounded round trip.
///
/// `evidence_effective` means tools ran and produced at least one
/// citation. `required` additionally needs an anchored citation.
pub fn assess(
    mode: EvidenceMode,
    tool_calls: u32,
    citations: &[CanonicalCitation],
    supports_required: bool,
) -> Assessment {
    if !mode.gathers_evidence() {
        return Assessment {
            evidence_effective: false,
            why_not_grounded: None,
            required_failure: None,
        };
    }

    let invoked = tool_calls > 0;
    let evidence_effective = invoked && !citations.is_empty();
    let anchored = citations
        .iter()
        .any(|c| c.source_type.satisfies_required());

    let reason = if !invoked {
        if mode == EvidenceMode::Required && !supports_required {
            WhyNotGrounded::BackendDoesNotSupportRequired
        } else {
            WhyNotGrounded::ToolNotInvoked
        }
    } else {
        WhyNotGrounded::ToolsInvokedNoAnchoredEvidence
    };

    match mode {
        EvidenceMode::Required if !(evidence_effective && anchored) => Assessment {
            evidence_effective,
            why_not_grounded: Some(reason),
            required_failure: Some(reason),
        },
        EvidenceMode::Auto if !evidence_effective => Assessment {
            evidence_effective,
            why_not_grounded: Some(reason),
            required_failure: None,
        },
        _ => Assessment {
            evidence_effective,
            why_not_grounded: None,
            required_failure: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundgate_core::SourceType;

    fn citation(source_type: SourceType) -> CanonicalCitation {
        CanonicalCitation {
            source: "mock".into(),
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
    fn tool_plan_by_mode() {
        assert_eq!(ToolPlan::for_mode(EvidenceMode::None), ToolPlan::OFF);
        for mode in [EvidenceMode::Auto, EvidenceMode::Required] {
            let plan = ToolPlan::for_mode(mode);
            assert!(plan.evidence_tools);
            assert_eq!(plan.tool_choice, ToolChoice::Auto);
        }
    }

    #[test]
    fn none_mode_is_never_grounded_and_never_explains() {
        let a = assess(EvidenceMode::None, 3, &[citation(SourceType::Anchored)], true);
        assert!(!a.evidence_effective);
        assert_eq!(a.why_not_grounded, None);
        assert_eq!(a.required_failure, None);
    }

    #[test]
    fn auto_with_unlinked_evidence_is_effective() {
        let a = assess(EvidenceMode::Auto, 1, &[citation(SourceType::Unlinked)], false);
        assert!(a.evidence_effective);
        assert_eq!(a.why_not_grounded, None);
    }

    #[test]
    fn auto_without_citations_succeeds_with_reason() {
        let a = assess(EvidenceMode::Auto, 2, &[], false);
        assert!(!a.evidence_effective);
        assert_eq!(a.why_not_grounded, Some(WhyNotGrounded::ToolsInvokedNoAnchoredEvidence));
        assert_eq!(a.required_failure, None);

        let a = assess(EvidenceMode::Auto, 0, &[], false);
        assert_eq!(a.why_not_grounded, Some(WhyNotGrounded::ToolNotInvoked));
    }

    #[test]
    fn citations_without_tool_calls_are_not_effective() {
        let a = assess(EvidenceMode::Auto, 0, &[citation(SourceType::TextHarvest)], false);
        assert!(!a.evidence_effective);
        assert_eq!(a.why_not_grounded, Some(WhyNotGrounded::ToolNotInvoked));
    }

    #[test]
    fn required_needs_an_anchor() {
        let a = assess(EvidenceMode::Required, 1, &[citation(SourceType::Unlinked)], true);
        assert!(a.evidence_effective);
        assert_eq!(
            a.required_failure,
            Some(WhyNotGrounded::ToolsInvokedNoAnchoredEvidence)
        );

        let a = assess(EvidenceMode::Required, 1, &[citation(SourceType::Anchored)], true);
        assert_eq!(a.required_failure, None);
        assert_eq!(a.why_not_grounded, None);
    }

    #[test]
    fn required_reason_depends_on_backend_support() {
        let a = assess(EvidenceMode::Required, 0, &[], false);
        assert_eq!(a.required_failure, Some(WhyNotGrounded::BackendDoesNotSupportRequired));

        let a = assess(EvidenceMode::Required, 0, &[], true);
        assert_eq!(a.required_failure, Some(WhyNotGrounded::ToolNotInvoked));
    }
}
