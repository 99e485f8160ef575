//! Delegated task types.
//!
//! A `delegate_task` tool call from the backend turns into a
//! [`SubagentTask`] tracked by the subagent manager. [`DelegateTaskCall`]
//! is the parsed argument shape of that tool call.

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Lifecycle status of a delegated task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Allocated, not yet streaming.
    Spawned,
    /// Actively streaming.
    Running,
    /// Resolved successfully.
    Completed,
    /// Resolved with an error, timeout, or cancellation.
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Parsed arguments of a `delegate_task` tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateTaskCall {
    /// Task type (e.g. `explore`, `edit`, `review`).
    #[serde(rename = "type")]
    pub task_type: String,
    /// Full prompt for the subagent.
    pub prompt: String,
    /// Short human-readable description shown while running.
    pub description: String,
    /// Override model for the subagent (None = backend default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tool names the subagent may use (None = backend default set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Tool names denied to the subagent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_tools: Vec<String>,
}

/// One delegated task and its outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentTask {
    /// Agent ID allocated at spawn time.
    pub agent_id: AgentId,
    /// Task type.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Full prompt.
    pub prompt: String,
    /// Short description.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Result text once terminal (success output or failure marker).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Wall-clock duration in milliseconds once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SubagentTask {
    /// Create a freshly spawned task from a parsed delegate call.
    #[must_use]
    pub fn spawned(agent_id: AgentId, call: &DelegateTaskCall) -> Self {
        Self {
            agent_id,
            task_type: call.task_type.clone(),
            prompt: call.prompt.clone(),
            description: call.description.clone(),
            status: TaskStatus::Spawned,
            result: None,
            duration_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_delegate_call_minimal() {
        let call: DelegateTaskCall = serde_json::from_value(json!({
            "type": "explore",
            "prompt": "map the settings module",
            "description": "Explore settings"
        }))
        .unwrap();
        assert_eq!(call.task_type, "explore");
        assert!(call.model.is_none());
        assert!(call.denied_tools.is_empty());
    }

    #[test]
    fn parse_delegate_call_with_scoping() {
        let call: DelegateTaskCall = serde_json::from_value(json!({
            "type": "edit",
            "prompt": "apply the rename",
            "description": "Apply rename",
            "model": "small",
            "allowedTools": ["read", "edit"],
            "deniedTools": ["bash"]
        }))
        .unwrap();
        assert_eq!(call.allowed_tools.as_deref(), Some(&["read".to_owned(), "edit".to_owned()][..]));
        assert_eq!(call.denied_tools, vec!["bash".to_owned()]);
    }

    #[test]
    fn status_terminal() {
        assert!(!TaskStatus::Spawned.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Failed).unwrap(), "\"failed\"");
    }

    #[test]
    fn spawned_task_has_no_outcome() {
        let call = DelegateTaskCall {
            task_type: "review".into(),
            prompt: "review the diff".into(),
            description: "Review".into(),
            model: None,
            allowed_tools: None,
            denied_tools: vec![],
        };
        let task = SubagentTask::spawned(AgentId::from("agent-1"), &call);
        assert_eq!(task.status, TaskStatus::Spawned);
        assert!(task.result.is_none());
        assert!(task.duration_ms.is_none());
    }
}
