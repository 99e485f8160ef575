//! Typed `$/progress` payloads and the protocol adapter.
//!
//! The backend streams one turn's output as `workDoneProgress`-style
//! notifications: a `begin`, any number of `report`s, then exactly one
//! `end`. Each notification carries the turn's `workDoneToken` so the
//! client can route it to the right listener.
//!
//! [`to_event`] is the adapter from decoded `report` payloads to
//! [`AgentEvent`]s; `begin`/`end` mark turn boundaries and are handled
//! by the conversation driver, which owns turn numbering and timing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crew_core::events::BaseEvent;
use crew_core::{AgentEvent, ConversationId, WorkDoneToken};

/// Parameters of a `$/progress` notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressParams {
    /// Correlation token for the in-flight turn.
    pub token: WorkDoneToken,
    /// The progress value.
    pub value: ProgressValue,
}

/// One progress notification value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProgressValue {
    /// The turn started streaming.
    Begin {
        /// Optional title shown while streaming.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// An intermediate streaming payload.
    Report {
        /// The typed payload.
        payload: ProgressPayload,
    },
    /// The turn finished streaming.
    End {
        /// Optional terminal message (e.g. stop reason).
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Typed payload inside a `report` progress value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ProgressPayload {
    /// Incremental assistant text.
    Delta {
        /// Text fragment.
        text: String,
    },
    /// The backend surfaced a tool call.
    ToolCall {
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Raw JSON arguments.
        arguments: Value,
    },
    /// A tool call resolved.
    ToolResult {
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Result text.
        output: String,
        /// Whether the tool reported an error.
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
    /// The backend opened a reasoning round.
    RoundStart {
        /// Round number (1-based).
        round: u32,
    },
    /// The backend closed a reasoning round.
    RoundEnd {
        /// Round number (1-based).
        round: u32,
        /// Round duration in milliseconds.
        #[serde(rename = "durationMs", default)]
        duration_ms: u64,
    },
}

/// Map a `report` payload to the event it represents.
///
/// Returns `None` for `begin`/`end` values: those are turn boundaries
/// the driver translates itself (it owns turn numbers and timing).
#[must_use]
pub fn to_event(conversation_id: &ConversationId, value: &ProgressValue) -> Option<AgentEvent> {
    let ProgressValue::Report { payload } = value else {
        return None;
    };
    let base = BaseEvent::now(conversation_id);
    Some(match payload {
        ProgressPayload::Delta { text } => AgentEvent::Delta {
            base,
            text: text.clone(),
        },
        ProgressPayload::ToolCall {
            tool_call_id,
            name,
            arguments,
        } => AgentEvent::ToolCall {
            base,
            tool_call_id: tool_call_id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
        },
        ProgressPayload::ToolResult {
            tool_call_id,
            output,
            is_error,
        } => AgentEvent::ToolResult {
            base,
            tool_call_id: tool_call_id.clone(),
            output: output.clone(),
            is_error: *is_error,
        },
        ProgressPayload::RoundStart { round } => AgentEvent::RoundStarted {
            base,
            round: *round,
        },
        ProgressPayload::RoundEnd { round, duration_ms } => AgentEvent::RoundFinished {
            base,
            round: *round,
            duration: *duration_ms,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn conv() -> ConversationId {
        ConversationId::from("conv-1")
    }

    #[test]
    fn parse_begin_report_end() {
        let begin: ProgressValue =
            serde_json::from_value(json!({"kind": "begin", "title": "thinking"})).unwrap();
        assert_matches!(begin, ProgressValue::Begin { title: Some(t) } if t == "thinking");

        let report: ProgressValue = serde_json::from_value(json!({
            "kind": "report",
            "payload": {"event": "delta", "text": "hi"}
        }))
        .unwrap();
        assert_matches!(report, ProgressValue::Report { .. });

        let end: ProgressValue = serde_json::from_value(json!({"kind": "end"})).unwrap();
        assert_matches!(end, ProgressValue::End { message: None });
    }

    #[test]
    fn params_carry_token() {
        let params: ProgressParams = serde_json::from_value(json!({
            "token": "wdt-42",
            "value": {"kind": "end", "message": "end_turn"}
        }))
        .unwrap();
        assert_eq!(params.token.as_str(), "wdt-42");
    }

    #[test]
    fn delta_report_becomes_delta_event() {
        let value = ProgressValue::Report {
            payload: ProgressPayload::Delta { text: "chunk".into() },
        };
        let event = to_event(&conv(), &value).unwrap();
        assert_matches!(event, AgentEvent::Delta { text, .. } if text == "chunk");
    }

    #[test]
    fn tool_call_report_preserves_arguments() {
        let value = ProgressValue::Report {
            payload: ProgressPayload::ToolCall {
                tool_call_id: "tc-1".into(),
                name: "delegate_task".into(),
                arguments: json!({"type": "explore"}),
            },
        };
        let event = to_event(&conv(), &value).unwrap();
        assert_matches!(event, AgentEvent::ToolCall { name, arguments, .. } => {
            assert_eq!(name, "delegate_task");
            assert_eq!(arguments["type"], "explore");
        });
    }

    #[test]
    fn round_end_maps_duration() {
        let value = ProgressValue::Report {
            payload: ProgressPayload::RoundEnd {
                round: 2,
                duration_ms: 930,
            },
        };
        let event = to_event(&conv(), &value).unwrap();
        assert_matches!(event, AgentEvent::RoundFinished { round: 2, duration: 930, .. });
    }

    #[test]
    fn boundaries_are_not_adapted() {
        assert!(to_event(&conv(), &ProgressValue::Begin { title: None }).is_none());
        assert!(to_event(&conv(), &ProgressValue::End { message: None }).is_none());
    }

    #[test]
    fn tool_result_default_is_error_false() {
        let payload: ProgressPayload = serde_json::from_value(json!({
            "event": "toolResult",
            "toolCallId": "tc-2",
            "output": "ok"
        }))
        .unwrap();
        assert_matches!(payload, ProgressPayload::ToolResult { is_error: false, .. });
    }
}
