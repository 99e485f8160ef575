//! Conversation record types.
//!
//! A conversation is created by `conversation/create` and lives until
//! session reset. The driver keeps an ordered transcript of turn records;
//! the backend holds the authoritative model context.

use serde::{Deserialize, Serialize};

/// Who owns a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationOwner {
    /// Top-level conversation that can delegate subtasks.
    Lead,
    /// A spawned, scoped conversation handling one delegated task.
    Subagent,
}

/// Role of one transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The user's message.
    User,
    /// The backend's streamed response.
    Assistant,
    /// A synthetic follow-up injected by the driver after a delegation
    /// round, carrying aggregated subagent results.
    SubagentSummary,
}

/// One entry in a conversation transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    /// Entry role.
    pub role: TurnRole,
    /// Full text of the entry.
    pub text: String,
    /// Turn number the entry belongs to (1-based).
    pub turn: u32,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl TurnRecord {
    /// Create a record stamped with the current UTC time.
    #[must_use]
    pub fn now(role: TurnRole, text: impl Into<String>, turn: u32) -> Self {
        Self {
            role,
            text: text.into(),
            turn,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
