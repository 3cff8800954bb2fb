//! # GroundGate Core
//!
//! The canonical request/response model shared by every GroundGate crate,
//! the [`BackendClient`] contract that transport adapters implement, and
//! the error taxonomy callers see.
//!
//! ## Design Philosophy
//!
//! Every subsystem depends inward on this crate:
//! - the citation engine consumes [`RawBackendResponse`] and produces
//!   [`CanonicalCitation`]s
//! - the admission controller keys its ledger on [`TokenClass`]
//! - the orchestrator drives a [`CanonicalRequest`] through a
//!   [`BackendClient`] and assembles a [`CanonicalResponse`]
//!
//! No framework dependencies live here, so the model can be tested in
//! isolation and adapters can be swapped via configuration.

pub mod backend;
pub mod error;
pub mod message;
pub mod provenance;
pub mod request;
pub mod response;
pub mod tokens;

// Re-export key types at crate root for ergonomics
pub use backend::{BackendCall, BackendClient, BackendKind, RawBackendResponse, ToolChoice};
pub use error::{BackendError, Error, RequestError, Result, TransportFailure};
pub use message::{Message, MessageKind, Role};
pub use request::{
    CanonicalRequest, ContextPolicy, EvidenceMode, LocationContext, RequestBuilder, Routing,
    TokenClass, TransportMode, MAX_LOCATION_CONTEXT_CHARS,
};
pub use response::{
    CanonicalCitation, CanonicalResponse, SourceType, Step2Record, TokenUsage, TrimNotice,
    WhyNotGrounded,
};
