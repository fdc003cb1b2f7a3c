//! Conversation data model, context-window pruning and history persistence.
//!
//! * [`ConversationTurn`] / [`Role`]: one immutable message in a chat.
//! * [`prune`]: trims a request so it fits the model's token budget,
//!   never touching the anchor (system) turn at index 0.
//! * [`HistoryStore`]: JSON persistence of the rolling history.
//!
//! # Quick start
//!
//! ```rust
//! use voice_chat::conversation::{prune, CharRatioEstimator, ConversationTurn};
//!
//! let request = vec![
//!     ConversationTurn::system("be brief"),
//!     ConversationTurn::user("x".repeat(500)),
//!     ConversationTurn::user("hello"),
//! ];
//! let pruned = prune(&request, 100, &CharRatioEstimator::new(1.0));
//! assert_eq!(pruned.len(), 2);
//! assert_eq!(pruned[0].content(), "be brief");
//! ```

pub mod prune;
pub mod store;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use prune::{prune, CharRatioEstimator, TokenEstimator, MIN_RETAINED_TURNS};
pub use store::{HistoryStore, StoreError};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name, as used in model requests and the history file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationTurn
// ---------------------------------------------------------------------------

/// A single message of the conversation.  Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered list of turns; insertion order is significant.
pub type ConversationHistory = Vec<ConversationTurn>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
