//! Provenance helpers: content hashing and the normative metadata keys
//! downstream auditing reads back out of requests and responses.

use sha2::{Digest, Sha256};

/// Exact location-context text the answer saw.
pub const LOCATION_CONTEXT_TEXT: &str = "location_context_text";
/// Length of the location context in characters (post-NFC).
pub const LOCATION_CONTEXT_LENGTH: &str = "location_context_length";
/// SHA-256 hex digest of the location context text.
pub const LOCATION_CONTEXT_HASH: &str = "location_context_hash";
/// Set when an open circuit forced a safer transport.
pub const ROUTING_DEGRADED: &str = "routing_degraded";
/// Transport mode that actually served the call.
pub const TRANSPORT_MODE_USED: &str = "transport_mode_used";

/// Hex-encoded SHA-256 of `text`.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
