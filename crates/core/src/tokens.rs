//! Token estimation utilities.
//!
//! Character heuristic: ~4 characters per token, rounded up, plus a fixed
//! per-message overhead for role markers. The admission controller only
//! needs an estimate; its class multipliers absorb the error.

use crate::message::Message;

/// Per-message overhead in tokens (role name, delimiters).
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4) as u32
}

/// Estimate tokens for a single message including overhead.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn messages_include_overhead() {
        let msgs = vec![Message::user("test"), Message::assistant("hello")];
        // (4 + 1) + (4 + 2)
        assert_eq!(estimate_messages_tokens(&msgs), 11);
    }
}
