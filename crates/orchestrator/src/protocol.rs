//! Round-trip construction for the grounded, reshape and finalize calls,
//! plus the provenance copied onto responses.

use crate::evidence::ToolPlan;
use groundgate_core::{
    BackendCall, CanonicalRequest, Message, Routing, Step2Record, provenance,
};
use serde_json::{Map, Value};

/// Instruction for the reshape step. It must not add facts, and it has no
/// tools to find new ones with.
pub const RESHAPE_INSTRUCTION: &str = "Rewrite the answer below as JSON that matches the \
required schema. Use only facts stated in the answer. Do not add, drop or look up information.";

/// The grounded round trip (or the only one). In two-step mode the schema
/// is withheld here and applied by the reshape call.
pub fn grounded_call(request: &CanonicalRequest, routing: Routing, max_output_tokens: u32) -> BackendCall {
    let tools = ToolPlan::for_mode(request.evidence_mode());
    let response_schema = if request.needs_two_step() {
        None
    } else {
        request.output_schema().cloned()
    };
    BackendCall {
        messages: request.messages().to_vec(),
        model: request.model_id().to_string(),
        temperature: request.temperature(),
        max_output_tokens,
        evidence_tools: tools.evidence_tools,
        tool_choice: tools.tool_choice,
        response_schema,
        routing,
    }
}

/// Step 2: tools off, schema attached, input is step 1's text only.
pub fn reshape_call(
    request: &CanonicalRequest,
    step1_text: &str,
    schema: Value,
    routing: Routing,
    max_output_tokens: u32,
) -> BackendCall {
    BackendCall {
        messages: vec![
            Message::system(RESHAPE_INSTRUCTION),
            Message::user(step1_text),
        ],
        model: request.model_id().to_string(),
        temperature: 0.0,
        max_output_tokens,
        evidence_tools: ToolPlan::OFF.evidence_tools,
        tool_choice: ToolPlan::OFF.tool_choice,
        response_schema: Some(schema),
        routing,
    }
}

/// The short post-deadline round trip: same conversation, tools off,
/// smaller budget. `schema` replaces the call's schema when given.
pub fn finalize_call(call: &BackendCall, max_output_tokens: u32, schema: Option<Value>) -> BackendCall {
    let mut call = call.clone();
    call.evidence_tools = ToolPlan::OFF.evidence_tools;
    call.tool_choice = ToolPlan::OFF.tool_choice;
    call.max_output_tokens = call.max_output_tokens.min(max_output_tokens);
    if schema.is_some() {
        call.response_schema = schema;
    }
    call
}

pub fn step2_record(step1_text: &str) -> Step2Record {
    Step2Record {
        step2_tools_invoked: false,
        step2_source_ref: provenance::sha256_hex(step1_text),
    }
}

/// Parse a structured answer, tolerating a Markdown code fence around it.
pub fn parse_structured(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

/// Copy every request metadata key the response lacks. Keys the
/// response already carries are left untouched.
pub fn mirror_provenance(request: &Map<String, Value>, response: &mut Map<String, Value>) -> usize {
    let mut copied = 0;
    for (key, value) in request {
        if response.contains_key(key) {
            continue;
        }
        response.insert(key.clone(), value.clone());
        copied += 1;
    }
    copied
}
