//! RPC error types.

use thiserror::Error;

/// Errors surfaced by the RPC layer.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport I/O failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a frame body.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or oversized frame.
    #[error("bad frame: {0}")]
    Frame(String),

    /// The backend answered a request with a JSON-RPC error object.
    #[error("backend error {code}: {message}")]
    Backend {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the backend.
        message: String,
    },

    /// The connection closed while a request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The client pool is shut down or exhausted.
    #[error("client pool closed")]
    PoolClosed,
}

impl RpcError {
    /// Whether this error means the connection is unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed | Self::PoolClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display() {
        let err = RpcError::Backend {
            code: -32601,
            message: "method not found".into(),
        };
        assert_eq!(err.to_string(), "backend error -32601: method not found");
    }

    #[test]
    fn fatality_classification() {
        assert!(RpcError::ConnectionClosed.is_fatal());
        assert!(!RpcError::Frame("bad header".into()).is_fatal());
        assert!(!RpcError::Backend { code: 1, message: String::new() }.is_fatal());
    }
}
