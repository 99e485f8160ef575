//! Subagent manager.
//!
//! Spawns a scoped subagent conversation for every `delegate_task`
//! tool call, tracks each by `agentId`, and forwards its streaming
//! output onto the lead's event bus. Each subagent draws its own
//! protocol client from the bounded pool and runs on its own task.
//!
//! Guarantees:
//!
//! - exactly one `SubagentCompleted` event per `agentId`, on both the
//!   success and the failure path
//! - one subagent's failure (error, timeout, cancellation) never
//!   cancels siblings and never faults the lead
//! - [`SubagentManager::await_all`] is idempotent: once every tracked
//!   subagent resolved, re-invocation returns the same outcomes
//!   immediately

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crew_core::events::BaseEvent;
use crew_core::text::truncate_with_marker;
use crew_core::{
    AgentEvent, AgentId, ConversationId, ConversationOwner, DelegateTaskCall, SubagentTask,
    TaskStatus, WorkDoneToken,
};
use crew_events::EventBus;
use crew_rpc::client::ClientToolHandler;
use crew_rpc::params::{
    CreateConversationParams, CreateConversationResult, InvokeClientToolParams, TurnParams,
};
use crew_rpc::progress::{ProgressPayload, ProgressValue};
use crew_rpc::{methods, ClientPool, PooledClient, RpcError};

use crate::errors::RuntimeError;

/// Configuration for spawned subagents.
#[derive(Clone, Debug)]
pub struct SubagentOptions {
    /// Workspace root passed on `conversation/create`.
    pub workspace_root: String,
    /// Model used when a task does not override it.
    pub default_model: String,
    /// Per-subagent wall-clock timeout.
    pub timeout: Duration,
    /// Maximum delegated tasks per round.
    pub max_per_round: usize,
}

impl Default for SubagentOptions {
    fn default() -> Self {
        Self {
            workspace_root: ".".into(),
            default_model: "default".into(),
            timeout: Duration::from_secs(300),
            max_per_round: 8,
        }
    }
}

/// Terminal outcome of one subagent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubagentOutcome {
    /// The agent.
    pub agent_id: AgentId,
    /// Short description from the delegate call.
    pub description: String,
    /// `Completed` or `Failed`.
    pub status: TaskStatus,
    /// Success output or failure marker.
    pub result: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Internal tracking for a running subagent.
struct TrackedSubagent {
    lead_id: ConversationId,
    task: SubagentTask,
    started_at: Instant,
    done: Notify,
    outcome: Mutex<Option<SubagentOutcome>>,
    cancel: CancellationToken,
}

impl TrackedSubagent {
    /// Record the outcome and emit the single terminal event. A second
    /// resolution attempt (e.g. timeout racing completion) is a no-op.
    fn resolve(&self, agent_id: &AgentId, bus: &EventBus, status: TaskStatus, result: String) {
        debug_assert!(status.is_terminal());
        let duration_ms = u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        {
            let mut slot = self.outcome.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(SubagentOutcome {
                agent_id: agent_id.clone(),
                description: self.task.description.clone(),
                status,
                result: result.clone(),
                duration_ms,
            });
        }
        let _ = bus.emit(AgentEvent::SubagentCompleted {
            base: BaseEvent::now(&self.lead_id),
            agent_id: agent_id.clone(),
            status,
            result,
            duration_ms,
        });
        self.done.notify_waiters();
    }
}

/// Spawns and tracks subagents for one lead conversation's rounds.
pub struct SubagentManager {
    pool: Arc<ClientPool>,
    bus: Arc<EventBus>,
    options: SubagentOptions,
    /// Tracked subagents: `agent_id` → tracker.
    subagents: DashMap<AgentId, Arc<TrackedSubagent>>,
    /// Spawn order, for stable aggregation.
    order: Mutex<Vec<AgentId>>,
}

impl SubagentManager {
    /// Create a manager drawing clients from `pool`.
    #[must_use]
    pub fn new(pool: Arc<ClientPool>, bus: Arc<EventBus>, options: SubagentOptions) -> Self {
        Self {
            pool,
            bus,
            options,
            subagents: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a subagent for a delegated task. Returns the allocated
    /// agent id immediately; the work runs on its own task.
    pub fn spawn(
        self: &Arc<Self>,
        lead_id: &ConversationId,
        call: DelegateTaskCall,
    ) -> Result<AgentId, RuntimeError> {
        if self.tracked_count() >= self.options.max_per_round {
            return Err(RuntimeError::RoundFull {
                max: self.options.max_per_round,
            });
        }

        let agent_id = AgentId::new();
        let tracker = Arc::new(TrackedSubagent {
            lead_id: lead_id.clone(),
            task: SubagentTask::spawned(agent_id.clone(), &call),
            started_at: Instant::now(),
            done: Notify::new(),
            outcome: Mutex::new(None),
            cancel: CancellationToken::new(),
        });
        let _ = self.subagents.insert(agent_id.clone(), tracker.clone());
        self.order.lock().push(agent_id.clone());

        let _ = self.bus.emit(AgentEvent::SubagentSpawned {
            base: BaseEvent::now(lead_id),
            agent_id: agent_id.clone(),
            task_type: call.task_type.clone(),
            description: call.description.clone(),
        });

        let manager = self.clone();
        let task_agent_id = agent_id.clone();
        let span = info_span!(
            "subagent",
            agent_id = %task_agent_id,
            lead_id = %lead_id,
            task_type = %call.task_type,
        );
        drop(tokio::spawn(
            async move {
                let bus = manager.bus.clone();
                let timeout = manager.options.timeout;
                let run = manager.run_subagent(&task_agent_id, &tracker, call);

                let resolution = tokio::select! {
                    result = tokio::time::timeout(timeout, run) => result,
                    () = tracker.cancel.cancelled() => {
                        tracker.resolve(
                            &task_agent_id,
                            &bus,
                            TaskStatus::Failed,
                            "cancelled".into(),
                        );
                        return;
                    }
                };

                match resolution {
                    Ok(Ok(output)) => {
                        tracker.resolve(&task_agent_id, &bus, TaskStatus::Completed, output);
                    }
                    Ok(Err(error)) => {
                        warn!(%error, "subagent run failed");
                        tracker.resolve(
                            &task_agent_id,
                            &bus,
                            TaskStatus::Failed,
                            error.to_string(),
                        );
                    }
                    Err(_) => {
                        tracker.resolve(
                            &task_agent_id,
                            &bus,
                            TaskStatus::Failed,
                            format!("timed out after {}ms", timeout.as_millis()),
                        );
                    }
                }
                info!("subagent resolved");
            }
            .instrument(span),
        ));

        Ok(agent_id)
    }

    /// Drive one subagent conversation to completion, forwarding its
    /// deltas to the lead's bus. Returns the accumulated output text.
    async fn run_subagent(
        &self,
        agent_id: &AgentId,
        tracker: &Arc<TrackedSubagent>,
        call: DelegateTaskCall,
    ) -> Result<String, RuntimeError> {
        let client: PooledClient = self.pool.checkout().await?;

        let create_params = CreateConversationParams {
            workspace_root: self.options.workspace_root.clone(),
            model: call
                .model
                .clone()
                .unwrap_or_else(|| self.options.default_model.clone()),
            owner: ConversationOwner::Subagent,
            allowed_tools: call.allowed_tools.clone(),
            denied_tools: call.denied_tools.clone(),
        };
        let created: CreateConversationResult = serde_json::from_value(
            client
                .request(
                    methods::CONVERSATION_CREATE,
                    serde_json::to_value(&create_params).map_err(RpcError::Json)?,
                )
                .await?,
        )
        .map_err(|e| RuntimeError::Malformed(e.to_string()))?;
        let subagent_conversation = created.conversation_id;

        let token = WorkDoneToken::for_turn();
        let mut progress = client.open_progress(&token);

        let turn_params = TurnParams {
            conversation_id: subagent_conversation,
            prompt: call.prompt,
            work_done_token: token.clone(),
        };
        let turn_value = serde_json::to_value(&turn_params).map_err(RpcError::Json)?;
        let client_handle = client.client().clone();
        let mut turn = tokio::spawn(async move {
            client_handle
                .request(methods::CONVERSATION_TURN, turn_value)
                .await
        });

        let mut output = String::new();
        let mut turn_result: Option<Result<Value, RpcError>> = None;
        loop {
            tokio::select! {
                value = progress.recv() => {
                    // None: listener dropped after `end`, or the
                    // connection died; the turn response settles it.
                    let Some(value) = value else { break };
                    match value {
                        ProgressValue::Report {
                            payload: ProgressPayload::Delta { text },
                        } => {
                            output.push_str(&text);
                            let _ = self.bus.emit(AgentEvent::SubagentDelta {
                                base: BaseEvent::now(&tracker.lead_id),
                                agent_id: agent_id.clone(),
                                text,
                            });
                        }
                        ProgressValue::Report {
                            payload: ProgressPayload::ToolCall {
                                tool_call_id,
                                name,
                                arguments,
                            },
                        } => {
                            let _ = self.bus.emit(AgentEvent::SubagentToolCall {
                                base: BaseEvent::now(&tracker.lead_id),
                                agent_id: agent_id.clone(),
                                tool_call_id,
                                name,
                                arguments,
                            });
                        }
                        ProgressValue::End { .. } => break,
                        // Begin and remaining reports (tool results,
                        // reasoning rounds) are internal to the
                        // subagent's own turn.
                        ProgressValue::Begin { .. } | ProgressValue::Report { .. } => {}
                    }
                }
                joined = &mut turn, if turn_result.is_none() => {
                    let result = match joined {
                        Ok(result) => result,
                        Err(join_error) => {
                            return Err(RuntimeError::Malformed(join_error.to_string()));
                        }
                    };
                    // A failed turn sends no `end`; stop streaming now.
                    let failed = result.is_err();
                    turn_result = Some(result);
                    if failed {
                        client.close_progress(&token);
                        break;
                    }
                }
            }
        }

        let turn_result = match turn_result {
            Some(result) => result,
            None => match turn.await {
                Ok(result) => result,
                Err(join_error) => return Err(RuntimeError::Malformed(join_error.to_string())),
            },
        };
        let _ = turn_result?;
        Ok(output)
    }

    /// Number of subagents tracked in the current round, resolved or
    /// not. A resolved subagent still counts until [`Self::reset_round`]
    /// consumes it: its result has not been fed back to the lead yet.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.subagents.len()
    }

    /// Whether the current round delegated any tasks.
    #[must_use]
    pub fn has_tracked(&self) -> bool {
        !self.subagents.is_empty()
    }

    /// Snapshot of the current round's tasks in spawn order, with
    /// terminal outcomes applied.
    #[must_use]
    pub fn tasks(&self) -> Vec<SubagentTask> {
        let ids: Vec<AgentId> = self.order.lock().clone();
        ids.iter()
            .filter_map(|id| self.subagents.get(id).map(|entry| entry.value().clone()))
            .map(|tracker| {
                let mut task = tracker.task.clone();
                match tracker.outcome.lock().as_ref() {
                    Some(outcome) => {
                        task.status = outcome.status;
                        task.result = Some(outcome.result.clone());
                        task.duration_ms = Some(outcome.duration_ms);
                    }
                    None => task.status = TaskStatus::Running,
                }
                task
            })
            .collect()
    }

    /// Number of tracked subagents without a terminal outcome.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.subagents
            .iter()
            .filter(|entry| entry.value().outcome.lock().is_none())
            .count()
    }

    /// Whether any tracked subagent is still unresolved.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Wait for every tracked subagent to resolve and return their
    /// outcomes in spawn order.
    ///
    /// Idempotent: once all subagents resolved, re-invocation returns
    /// the same outcomes immediately.
    pub async fn await_all(&self) -> Vec<SubagentOutcome> {
        let ids: Vec<AgentId> = self.order.lock().clone();
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(tracker) = self.subagents.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            loop {
                // Register the waiter before re-checking the slot, so a
                // resolution between check and await cannot be missed.
                let notified = tracker.done.notified();
                if let Some(outcome) = tracker.outcome.lock().clone() {
                    outcomes.push(outcome);
                    break;
                }
                notified.await;
            }
        }
        outcomes
    }

    /// Cancel every unresolved subagent. Each resolves as Failed with a
    /// `cancelled` marker and still emits its terminal event.
    pub fn cancel_all(&self) {
        for entry in &self.subagents {
            if entry.value().outcome.lock().is_none() {
                entry.value().cancel.cancel();
            }
        }
    }

    /// Forget resolved subagents so the next round starts fresh.
    /// Unresolved trackers (there should be none when the driver calls
    /// this) are kept.
    pub fn reset_round(&self) {
        self.subagents
            .retain(|_, tracker| tracker.outcome.lock().is_none());
        let mut order = self.order.lock();
        order.retain(|id| self.subagents.contains_key(id));
    }
}

/// Longest per-task result carried into the synthetic follow-up
/// prompt; anything beyond is cut with a marker.
const MAX_AGGREGATED_RESULT_BYTES: usize = 8 * 1024;

/// Build the synthetic follow-up prompt from a round's outcomes.
#[must_use]
pub fn aggregate_results(outcomes: &[SubagentOutcome]) -> String {
    let mut summary = String::from("All delegated tasks have resolved. Results:\n");
    for outcome in outcomes {
        let status = match outcome.status {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Spawned | TaskStatus::Running => "unresolved",
        };
        summary.push_str(&format!(
            "\n## {} ({status}, {}ms)\n{}\n",
            outcome.description,
            outcome.duration_ms,
            truncate_with_marker(&outcome.result, MAX_AGGREGATED_RESULT_BYTES),
        ));
    }
    summary
}

// ─────────────────────────────────────────────────────────────────────────────
// DelegationHandler — client-tool hook for delegate_task
// ─────────────────────────────────────────────────────────────────────────────

/// Name of the delegation tool the backend invokes on the client.
pub const DELEGATE_TASK: &str = "delegate_task";

/// Routes backend `conversation/invokeClientTool` requests: a
/// `delegate_task` call becomes a spawn and is answered immediately
/// with the allocated agent id, so the backend's turn can reach its
/// `end` event while the subagent runs.
pub struct DelegationHandler {
    manager: Arc<SubagentManager>,
}

impl DelegationHandler {
    /// Create a handler spawning through `manager`.
    #[must_use]
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ClientToolHandler for DelegationHandler {
    async fn invoke_tool(&self, params: InvokeClientToolParams) -> Result<Value, String> {
        if params.name != DELEGATE_TASK {
            return Err(format!("client tool not available: {}", params.name));
        }
        let call: DelegateTaskCall = serde_json::from_value(params.arguments)
            .map_err(|e| format!("malformed delegate_task arguments: {e}"))?;
        let agent_id = self
            .manager
            .spawn(&params.conversation_id, call)
            .map_err(|e| e.to_string())?;
        Ok(json!({ "agentId": agent_id, "status": "spawned" }))
    }
}
