//! Conversation history types
//!
//! The history is an ordered, append-only sequence of messages: exactly one
//! initial system message, then strictly chronological user/assistant turns.
//! It is owned by one session and mutated only through [`append_user_turn`]
//! and [`append_assistant_turn`]; readers take immutable snapshots, so a
//! model request already in flight never observes later mutations.
//!
//! [`append_user_turn`]: ConversationHistory::append_user_turn
//! [`append_assistant_turn`]: ConversationHistory::append_assistant_turn

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Ordered conversation history for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// Create a history seeded with the persona/system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Append a finalized user transcript as the next user turn.
    pub fn append_user_turn(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    /// Append a completed reply as the next assistant turn.
    ///
    /// Must only be called once the full reply text for the turn is known;
    /// cancelled or failed replies are never appended.
    pub fn append_assistant_turn(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    /// Immutable snapshot of the full history for building a model request.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Total number of messages including the system message
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user turns
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count()
    }

    /// Number of assistant turns
    pub fn assistant_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }

    /// The most recent message, if any turn has been appended
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
