//! Lead conversation driver.
//!
//! Owns one lead conversation: creates it at the backend, runs turns
//! one at a time, streams progress onto the bus, and enforces the
//! round-blocking rule. After a turn ends, if the round delegated work
//! the driver suspends until every subagent resolves, then issues a
//! synthetic follow-up turn carrying the aggregated results. Only when
//! a turn ends with nothing pending does control return to the caller
//! for the next user message.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crew_core::events::BaseEvent;
use crew_core::{
    AgentEvent, ConversationId, ConversationOwner, TurnRecord, TurnRole, WorkDoneToken,
};
use crew_events::EventBus;
use crew_rpc::params::{CreateConversationParams, CreateConversationResult, TurnParams, TurnResult};
use crew_rpc::progress::ProgressValue;
use crew_rpc::{methods, progress, RpcClient, RpcError};

use crate::errors::RuntimeError;
use crate::subagents::{aggregate_results, SubagentManager};

/// Options for creating a lead conversation.
#[derive(Clone, Debug)]
pub struct DriverOptions {
    /// Workspace root passed on `conversation/create`.
    pub workspace_root: String,
    /// Requested model.
    pub model: String,
    /// Maximum delegation rounds per user message.
    pub max_rounds: u32,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            workspace_root: ".".into(),
            model: "default".into(),
            max_rounds: 10,
        }
    }
}

/// Result of a completed user turn (including any follow-up rounds).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Assistant text of the final turn.
    pub text: String,
    /// Number of backend turns run (1 + one per delegation round).
    pub turns: u32,
    /// Number of delegation rounds resolved.
    pub rounds: u32,
}

/// Whether the driver is currently streaming a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DriverState {
    Idle,
    Streaming,
}

/// Outcome of a single backend turn.
struct SingleTurn {
    text: String,
}

/// Drives one lead conversation.
pub struct ConversationDriver {
    client: Arc<RpcClient>,
    bus: Arc<EventBus>,
    subagents: Arc<SubagentManager>,
    conversation_id: ConversationId,
    options: DriverOptions,
    state: Mutex<DriverState>,
    transcript: Mutex<Vec<TurnRecord>>,
    turn_counter: AtomicU32,
    round_counter: AtomicU32,
    current_token: Mutex<Option<WorkDoneToken>>,
    round_cancel: Mutex<CancellationToken>,
}

impl ConversationDriver {
    /// Create the lead conversation at the backend.
    pub async fn create(
        client: Arc<RpcClient>,
        bus: Arc<EventBus>,
        subagents: Arc<SubagentManager>,
        options: DriverOptions,
    ) -> Result<Self, RuntimeError> {
        let params = CreateConversationParams {
            workspace_root: options.workspace_root.clone(),
            model: options.model.clone(),
            owner: ConversationOwner::Lead,
            allowed_tools: None,
            denied_tools: vec![],
        };
        let created: CreateConversationResult = serde_json::from_value(
            client
                .request(
                    methods::CONVERSATION_CREATE,
                    serde_json::to_value(&params).map_err(RpcError::Json)?,
                )
                .await?,
        )
        .map_err(|e| RuntimeError::Malformed(e.to_string()))?;

        info!(conversation_id = %created.conversation_id, "lead conversation created");
        Ok(Self {
            client,
            bus,
            subagents,
            conversation_id: created.conversation_id,
            options,
            state: Mutex::new(DriverState::Idle),
            transcript: Mutex::new(Vec::new()),
            turn_counter: AtomicU32::new(0),
            round_counter: AtomicU32::new(0),
            current_token: Mutex::new(None),
            round_cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// The lead conversation id.
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Snapshot of the ordered transcript.
    #[must_use]
    pub fn transcript(&self) -> Vec<TurnRecord> {
        self.transcript.lock().clone()
    }

    /// Whether a turn is currently streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        *self.state.lock() == DriverState::Streaming
    }

    /// Run one user turn to quiescence.
    ///
    /// Blocks (asynchronously) through every delegation round: the
    /// returned outcome is only produced once a turn ends without
    /// delegating work, so the caller can always submit the next user
    /// message after this resolves.
    pub async fn send_turn(&self, prompt: &str) -> Result<TurnOutcome, RuntimeError> {
        {
            let mut state = self.state.lock();
            if *state == DriverState::Streaming {
                return Err(RuntimeError::TurnInFlight {
                    conversation_id: self.conversation_id.clone(),
                });
            }
            *state = DriverState::Streaming;
        }
        let cancel = CancellationToken::new();
        *self.round_cancel.lock() = cancel.clone();

        let result = self
            .run_to_quiescence(prompt, &cancel)
            .instrument(info_span!("lead_turn", conversation_id = %self.conversation_id))
            .await;

        if result.is_err() {
            // Abandoned rounds must not leak tracked subagents into the
            // next user turn.
            self.subagents.cancel_all();
            let _ = self.subagents.await_all().await;
            self.subagents.reset_round();
        }
        *self.state.lock() = DriverState::Idle;
        *self.current_token.lock() = None;
        result
    }

    async fn run_to_quiescence(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, RuntimeError> {
        // User and summary records are stamped with the turn they
        // precede; assistant records with the turn that produced them.
        self.record(
            TurnRole::User,
            prompt,
            self.turn_counter.load(Ordering::Relaxed) + 1,
        );

        let mut next_prompt = prompt.to_owned();
        let mut turns = 0u32;
        let mut rounds = 0u32;

        loop {
            let single = self.run_single_turn(&next_prompt, cancel).await?;
            turns += 1;

            if !self.subagents.has_tracked() {
                self.record(
                    TurnRole::Assistant,
                    &single.text,
                    self.turn_counter.load(Ordering::Relaxed),
                );
                return Ok(TurnOutcome {
                    text: single.text,
                    turns,
                    rounds,
                });
            }

            // Round boundary: the turn delegated work. Never advance
            // until every subagent of the round resolves.
            if rounds >= self.options.max_rounds {
                self.subagents.cancel_all();
                let _ = self.subagents.await_all().await;
                self.subagents.reset_round();
                return Err(RuntimeError::RoundLimit {
                    max_rounds: self.options.max_rounds,
                });
            }
            rounds += 1;
            let round = self.round_counter.fetch_add(1, Ordering::Relaxed) + 1;
            let task_count = self.subagents.tracked_count();
            // Delegation rounds are reported through the team events;
            // `RoundStarted`/`RoundFinished` belong to the backend's
            // reasoning-round stream forwarded from progress reports.
            let _ = self.bus.emit(AgentEvent::TeamStarted {
                base: BaseEvent::now(&self.conversation_id),
                round,
                task_count,
            });

            let outcomes = self.subagents.await_all().await;
            debug_assert!(!self.subagents.has_pending());

            let succeeded = outcomes
                .iter()
                .filter(|o| o.status == crew_core::TaskStatus::Completed)
                .count();
            let _ = self.bus.emit(AgentEvent::TeamFinished {
                base: BaseEvent::now(&self.conversation_id),
                round,
                succeeded,
                failed: outcomes.len() - succeeded,
            });

            debug!(round, succeeded, total = outcomes.len(), "delegation round resolved");

            next_prompt = aggregate_results(&outcomes);
            self.record(
                TurnRole::SubagentSummary,
                &next_prompt,
                self.turn_counter.load(Ordering::Relaxed) + 1,
            );
            self.subagents.reset_round();
        }
    }

    /// Run one backend turn: request + progress stream until `end`.
    async fn run_single_turn(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<SingleTurn, RuntimeError> {
        let token = WorkDoneToken::for_turn();
        *self.current_token.lock() = Some(token.clone());
        let mut progress_rx = self.client.open_progress(&token);

        let turn = self.turn_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        let params = TurnParams {
            conversation_id: self.conversation_id.clone(),
            prompt: prompt.to_owned(),
            work_done_token: token.clone(),
        };
        let turn_value = serde_json::to_value(&params).map_err(RpcError::Json)?;
        let client = self.client.clone();
        let mut request = tokio::spawn(async move {
            client.request(methods::CONVERSATION_TURN, turn_value).await
        });

        let mut text = String::new();
        let mut request_result: Option<Result<Value, RpcError>> = None;
        let stream_result: Result<(), RuntimeError> = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = self.client.cancel_turn(&token);
                    self.client.close_progress(&token);
                    self.subagents.cancel_all();
                    let _ = self.bus.emit(AgentEvent::Cancelled {
                        base: BaseEvent::now(&self.conversation_id),
                    });
                    break Err(RuntimeError::Cancelled);
                }
                value = progress_rx.recv() => {
                    let Some(value) = value else {
                        // The reader clears all progress listeners when
                        // the connection drops; surface the transport
                        // fault on the bus regardless of which branch
                        // observes it first.
                        let _ = self.bus.emit(AgentEvent::Error {
                            base: BaseEvent::now(&self.conversation_id),
                            message: RpcError::ConnectionClosed.to_string(),
                        });
                        break Err(RuntimeError::Rpc(RpcError::ConnectionClosed));
                    };
                    match &value {
                        ProgressValue::Begin { .. } => {
                            let _ = self.bus.emit(AgentEvent::TurnStarted {
                                base: BaseEvent::now(&self.conversation_id),
                                turn,
                            });
                        }
                        ProgressValue::End { .. } => {
                            let _ = self.bus.emit(AgentEvent::TurnFinished {
                                base: BaseEvent::now(&self.conversation_id),
                                turn,
                                duration: u64::try_from(started.elapsed().as_millis())
                                    .unwrap_or(u64::MAX),
                            });
                            break Ok(());
                        }
                        ProgressValue::Report { .. } => {
                            match progress::to_event(&self.conversation_id, &value) {
                                Some(AgentEvent::Delta { base, text: chunk }) => {
                                    text.push_str(&chunk);
                                    let _ = self.bus.emit(AgentEvent::Delta { base, text: chunk });
                                }
                                Some(event) => {
                                    let _ = self.bus.emit(event);
                                }
                                None => {}
                            }
                        }
                    }
                }
                joined = &mut request, if request_result.is_none() => {
                    let result = match joined {
                        Ok(result) => result,
                        Err(join_error) => {
                            break Err(RuntimeError::Malformed(join_error.to_string()));
                        }
                    };
                    if let Err(error) = result {
                        // A failed turn sends no `end`.
                        self.client.close_progress(&token);
                        if error.is_fatal() {
                            self.client.close();
                        }
                        let _ = self.bus.emit(AgentEvent::Error {
                            base: BaseEvent::now(&self.conversation_id),
                            message: error.to_string(),
                        });
                        break Err(error.into());
                    }
                    request_result = Some(result);
                }
            }
        };
        stream_result?;

        // The backend's response settles after `end`; it may already
        // have arrived above.
        let settled = match request_result {
            Some(result) => result,
            None => match request.await {
                Ok(result) => result,
                Err(join_error) => {
                    return Err(RuntimeError::Malformed(join_error.to_string()));
                }
            },
        };
        match settled {
            Ok(value) => {
                let result: TurnResult = serde_json::from_value(value).unwrap_or_default();
                debug!(turn, stop_reason = result.stop_reason.as_deref(), "turn settled");
            }
            Err(error) => {
                let _ = self.bus.emit(AgentEvent::Error {
                    base: BaseEvent::now(&self.conversation_id),
                    message: error.to_string(),
                });
                return Err(error.into());
            }
        }

        Ok(SingleTurn { text })
    }

    /// Cancel the in-flight round: notify the backend for the current
    /// token and cancel all child subagent tasks.
    pub fn cancel_round(&self) {
        self.round_cancel.lock().cancel();
    }

    fn record(&self, role: TurnRole, text: &str, turn: u32) {
        self.transcript.lock().push(TurnRecord::now(role, text, turn));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = DriverOptions::default();
        assert_eq!(options.max_rounds, 10);
        assert_eq!(options.model, "default");
    }
}
