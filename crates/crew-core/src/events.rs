//! Event types broadcast over the event bus.
//!
//! [`AgentEvent`] is the tagged union decoupling the protocol layer from
//! presentation. Every variant carries the owning conversation id (and,
//! for subagent variants, the owning agent id) so consumers can route
//! without inspecting payloads. Events are transient: they drive live
//! rendering and the delegation state machine, never persistence.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, ConversationId};
use crate::task::TaskStatus;

/// Fields shared by every event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Conversation this event belongs to.
    pub conversation_id: ConversationId,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a new base event with the current UTC timestamp.
    #[must_use]
    pub fn now(conversation_id: &ConversationId) -> Self {
        Self {
            conversation_id: conversation_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Events emitted by the orchestration layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    // -- Turn lifecycle --

    /// A turn started streaming.
    #[serde(rename = "turn_started")]
    TurnStarted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Turn number within the conversation (1-based).
        turn: u32,
    },

    /// A turn finished streaming (backend sent the `end` progress event).
    #[serde(rename = "turn_finished")]
    TurnFinished {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Turn number within the conversation (1-based).
        turn: u32,
        /// Duration in milliseconds.
        duration: u64,
    },

    // -- Streaming content --

    /// Incremental assistant text.
    #[serde(rename = "delta")]
    Delta {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Text fragment.
        text: String,
    },

    /// The backend requested a tool invocation.
    #[serde(rename = "tool_call")]
    ToolCall {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Tool arguments as raw JSON.
        arguments: Value,
    },

    /// A tool invocation completed.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Result text.
        output: String,
        /// Whether the tool reported an error.
        #[serde(rename = "isError")]
        is_error: bool,
    },

    // -- Reasoning-round boundaries (backend-numbered, forwarded from
    // progress reports; delegation rounds use the team events) --

    /// The backend opened a reasoning round within a turn.
    #[serde(rename = "round_started")]
    RoundStarted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Backend round number (1-based).
        round: u32,
    },

    /// The backend closed a reasoning round.
    #[serde(rename = "round_finished")]
    RoundFinished {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Backend round number (1-based).
        round: u32,
        /// Duration in milliseconds.
        duration: u64,
    },

    // -- Subagent lifecycle --

    /// A subagent was spawned for a delegated task.
    #[serde(rename = "subagent_spawned")]
    SubagentSpawned {
        /// Base fields (lead conversation).
        #[serde(flatten)]
        base: BaseEvent,
        /// Spawned agent ID.
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        /// Task type (e.g. `explore`, `edit`).
        #[serde(rename = "taskType")]
        task_type: String,
        /// Short human-readable description.
        description: String,
    },

    /// Incremental text from a running subagent.
    #[serde(rename = "subagent_delta")]
    SubagentDelta {
        /// Base fields (lead conversation).
        #[serde(flatten)]
        base: BaseEvent,
        /// Owning agent ID.
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        /// Text fragment.
        text: String,
    },

    /// A subagent's turn surfaced a tool call.
    #[serde(rename = "subagent_tool_call")]
    SubagentToolCall {
        /// Base fields (lead conversation).
        #[serde(flatten)]
        base: BaseEvent,
        /// Owning agent ID.
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Raw JSON arguments.
        arguments: Value,
    },

    /// A subagent resolved. Emitted exactly once per agent ID, on both
    /// the success and the failure path.
    #[serde(rename = "subagent_completed")]
    SubagentCompleted {
        /// Base fields (lead conversation).
        #[serde(flatten)]
        base: BaseEvent,
        /// Resolved agent ID.
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        /// Terminal status (`Completed` or `Failed`).
        status: TaskStatus,
        /// Result text (success output or failure marker).
        result: String,
        /// Wall-clock duration in milliseconds.
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },

    // -- Team lifecycle --

    /// A team of subagents started working a round.
    #[serde(rename = "team_started")]
    TeamStarted {
        /// Base fields (lead conversation).
        #[serde(flatten)]
        base: BaseEvent,
        /// Round number.
        round: u32,
        /// Number of delegated tasks in the round.
        #[serde(rename = "taskCount")]
        task_count: usize,
    },

    /// A team finished: every subagent of the round resolved.
    #[serde(rename = "team_finished")]
    TeamFinished {
        /// Base fields (lead conversation).
        #[serde(flatten)]
        base: BaseEvent,
        /// Round number.
        round: u32,
        /// Count of subagents that completed successfully.
        succeeded: usize,
        /// Count of subagents that failed (including timeouts).
        failed: usize,
    },

    // -- Terminal --

    /// The current turn was cancelled. Distinct from [`AgentEvent::Error`].
    #[serde(rename = "cancelled")]
    Cancelled {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// A transport or backend fault terminated the turn.
    #[serde(rename = "error")]
    Error {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Error message.
        message: String,
    },
}

impl AgentEvent {
    /// Wire name of the variant (the serde tag).
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. } => "turn_started",
            Self::TurnFinished { .. } => "turn_finished",
            Self::Delta { .. } => "delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::RoundStarted { .. } => "round_started",
            Self::RoundFinished { .. } => "round_finished",
            Self::SubagentSpawned { .. } => "subagent_spawned",
            Self::SubagentDelta { .. } => "subagent_delta",
            Self::SubagentToolCall { .. } => "subagent_tool_call",
            Self::SubagentCompleted { .. } => "subagent_completed",
            Self::TeamStarted { .. } => "team_started",
            Self::TeamFinished { .. } => "team_finished",
            Self::Cancelled { .. } => "cancelled",
            Self::Error { .. } => "error",
        }
    }

    /// The conversation this event belongs to.
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        let base = match self {
            Self::TurnStarted { base, .. }
            | Self::TurnFinished { base, .. }
            | Self::Delta { base, .. }
            | Self::ToolCall { base, .. }
            | Self::ToolResult { base, .. }
            | Self::RoundStarted { base, .. }
            | Self::RoundFinished { base, .. }
            | Self::SubagentSpawned { base, .. }
            | Self::SubagentDelta { base, .. }
            | Self::SubagentToolCall { base, .. }
            | Self::SubagentCompleted { base, .. }
            | Self::TeamStarted { base, .. }
            | Self::TeamFinished { base, .. }
            | Self::Cancelled { base, .. }
            | Self::Error { base, .. } => base,
        };
        &base.conversation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> BaseEvent {
        BaseEvent::now(&ConversationId::from("conv-1"))
    }

    #[test]
    fn delta_serializes_with_tag() {
        let event = AgentEvent::Delta {
            base: base(),
            text: "hello".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "delta");
        assert_eq!(value["conversationId"], "conv-1");
        assert_eq!(value["text"], "hello");
    }

    #[test]
    fn subagent_completed_roundtrip() {
        let event = AgentEvent::SubagentCompleted {
            base: base(),
            agent_id: AgentId::from("agent-1"),
            status: TaskStatus::Failed,
            result: "timed out".into(),
            duration_ms: 1500,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn tool_call_carries_raw_arguments() {
        let event = AgentEvent::ToolCall {
            base: base(),
            tool_call_id: "tc-1".into(),
            name: "delegate_task".into(),
            arguments: json!({"type": "explore", "prompt": "find the config loader"}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["toolCallId"], "tc-1");
        assert_eq!(value["arguments"]["type"], "explore");
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let event = AgentEvent::Cancelled { base: base() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type());
    }

    #[test]
    fn conversation_id_accessor() {
        let event = AgentEvent::Error {
            base: base(),
            message: "boom".into(),
        };
        assert_eq!(event.conversation_id().as_str(), "conv-1");
    }
}
