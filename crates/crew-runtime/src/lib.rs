//! # crew-runtime
//!
//! The delegation and turn-orchestration state machine.
//!
//! - [`driver::ConversationDriver`] runs the lead conversation: one
//!   in-flight turn at a time, progress streaming, and the
//!   round-blocking rule (a round with pending subagents never
//!   advances until every subagent resolves).
//! - [`subagents::SubagentManager`] spawns and tracks subagents for
//!   `delegate_task` tool calls, isolates sibling failures, and
//!   aggregates all results for the lead's synthetic follow-up turn.
//! - [`subagents::DelegationHandler`] is the client-tool hook that
//!   turns a backend `conversation/invokeClientTool` request for
//!   `delegate_task` into a spawn.

#![deny(unsafe_code)]

pub mod driver;
pub mod errors;
pub mod subagents;

pub use driver::{ConversationDriver, DriverOptions, TurnOutcome};
pub use errors::RuntimeError;
pub use subagents::{DelegationHandler, SubagentManager, SubagentOptions, SubagentOutcome};
