//! # crew-core
//!
//! Foundation types for the Crew delegation protocol.
//!
//! This crate provides the shared vocabulary that all other Crew crates
//! depend on:
//!
//! - **Branded IDs**: `ConversationId`, `AgentId`, `WorkDoneToken` as
//!   newtypes for type safety
//! - **Events**: `AgentEvent` tagged union broadcast over the event bus
//! - **Tasks**: `SubagentTask` and `TaskStatus` for delegated work
//! - **Conversations**: owner and transcript record types
//! - **Text utilities**: safe truncation for result summaries

#![deny(unsafe_code)]

pub mod conversation;
pub mod events;
pub mod ids;
pub mod task;
pub mod text;

pub use conversation::{ConversationOwner, TurnRecord, TurnRole};
pub use events::AgentEvent;
pub use ids::{AgentId, ConversationId, WorkDoneToken};
pub use task::{DelegateTaskCall, SubagentTask, TaskStatus};
