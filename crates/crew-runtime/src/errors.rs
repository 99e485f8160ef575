//! Runtime error types.

use thiserror::Error;

use crew_core::ConversationId;
use crew_rpc::RpcError;

/// Errors surfaced by the orchestration layer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// RPC transport or backend failure.
    #[error("{0}")]
    Rpc(#[from] RpcError),

    /// A turn was submitted while another is still streaming.
    #[error("turn already in flight for conversation {conversation_id}")]
    TurnInFlight {
        /// The busy conversation.
        conversation_id: ConversationId,
    },

    /// The current round was cancelled.
    #[error("round cancelled")]
    Cancelled,

    /// A delegation round asked for more subagents than allowed.
    #[error("delegation round full: {max} subagents already pending")]
    RoundFull {
        /// Configured per-round limit.
        max: usize,
    },

    /// Follow-up turns kept delegating past the configured bound.
    #[error("delegation did not converge within {max_rounds} rounds")]
    RoundLimit {
        /// Configured round bound.
        max_rounds: u32,
    },

    /// The backend returned a malformed payload.
    #[error("malformed backend payload: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_in_flight_names_conversation() {
        let err = RuntimeError::TurnInFlight {
            conversation_id: ConversationId::from("conv-9"),
        };
        assert!(err.to_string().contains("conv-9"));
    }

    #[test]
    fn rpc_error_converts() {
        let err: RuntimeError = RpcError::ConnectionClosed.into();
        assert!(matches!(err, RuntimeError::Rpc(RpcError::ConnectionClosed)));
    }

    #[test]
    fn round_limit_display() {
        let err = RuntimeError::RoundLimit { max_rounds: 10 };
        assert!(err.to_string().contains("10 rounds"));
    }
}
