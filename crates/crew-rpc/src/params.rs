//! Typed parameter and result shapes for the conversation methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crew_core::{ConversationId, ConversationOwner, WorkDoneToken};

/// Parameters for `conversation/create`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationParams {
    /// Workspace root the conversation operates in.
    pub workspace_root: String,
    /// Requested model.
    pub model: String,
    /// Lead or subagent.
    pub owner: ConversationOwner,
    /// Tool names this conversation may use (None = backend default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Tool names denied to this conversation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_tools: Vec<String>,
}

/// Result of `conversation/create`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResult {
    /// The backend-allocated conversation id.
    pub conversation_id: ConversationId,
}

/// Parameters for `conversation/turn`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnParams {
    /// Conversation to advance.
    pub conversation_id: ConversationId,
    /// The user (or synthetic) prompt.
    pub prompt: String,
    /// Token correlating this turn's progress notifications.
    pub work_done_token: WorkDoneToken,
}

/// Result of `conversation/turn`, delivered after the `end` progress
/// event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    /// Stop reason reported by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Parameters of a backend-initiated `conversation/invokeClientTool`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeClientToolParams {
    /// Conversation the invocation belongs to.
    pub conversation_id: ConversationId,
    /// Tool call ID from the stream.
    pub tool_call_id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_params_wire_shape() {
        let params = CreateConversationParams {
            workspace_root: "/work".into(),
            model: "default".into(),
            owner: ConversationOwner::Subagent,
            allowed_tools: Some(vec!["read".into()]),
            denied_tools: vec!["bash".into()],
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["workspaceRoot"], "/work");
        assert_eq!(value["owner"], "subagent");
        assert_eq!(value["deniedTools"][0], "bash");
    }

    #[test]
    fn invoke_tool_params_parse() {
        let params: InvokeClientToolParams = serde_json::from_value(json!({
            "conversationId": "conv-1",
            "toolCallId": "tc-1",
            "name": "delegate_task",
            "arguments": {"type": "explore", "prompt": "p", "description": "d"}
        }))
        .unwrap();
        assert_eq!(params.name, "delegate_task");
        assert_eq!(params.arguments["type"], "explore");
    }

    #[test]
    fn turn_result_tolerates_empty_object() {
        let result: TurnResult = serde_json::from_value(json!({})).unwrap();
        assert!(result.stop_reason.is_none());
    }
}
