//! Backend transport adapters for GroundGate.
//!
//! One [`BackendClient`](groundgate_core::BackendClient) per vendor wire
//! family, plus a registry built from configuration. Clients send exactly
//! one round trip per `invoke()`; retries, citation normalization and
//! evidence contracts live elsewhere.

pub mod anthropic;
pub mod gemini;
pub mod http;
pub mod openai;
pub mod openai_compat;
pub mod registry;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use openai_compat::OpenAiCompatClient;
pub use registry::{BackendRegistry, build_from_config};
