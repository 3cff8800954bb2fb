//! Role-tagged conversation messages.
//!
//! A [`Message`] is the unit the orchestrator splices and forwards to a
//! backend. The injected location-context preamble is an ordinary system
//! message tagged with [`MessageKind::LocationContext`] so it can always be
//! found (and counted) again.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Supplied by the caller as part of the conversation.
    #[default]
    Conversation,
    /// Injected by the orchestrator from the request's location context.
    LocationContext,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Caller-supplied or injected
    #[serde(default, skip_serializing_if = "is_conversation")]
    pub kind: MessageKind,
}

fn is_conversation(kind: &MessageKind) -> bool {
    *kind == MessageKind::Conversation
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            kind: MessageKind::Conversation,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            kind: MessageKind::Conversation,
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            kind: MessageKind::Conversation,
        }
    }

    /// Create the location-context preamble message.
    pub fn location_context(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            kind: MessageKind::LocationContext,
        }
    }

    /// Whether this is a caller-supplied system message.
    pub fn is_caller_system(&self) -> bool {
        self.role == Role::System && self.kind == MessageKind::Conversation
    }

    /// Whether this message is the injected location-context preamble.
    pub fn is_location_context(&self) -> bool {
        self.kind == MessageKind::LocationContext
    }
}
