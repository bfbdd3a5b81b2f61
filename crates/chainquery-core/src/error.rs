//! Error types for transports and the query engine.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Failure of one round trip to the node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failure or non-2xx status. Carries the status and body
    /// when the node answered at all.
    #[error("http transport: {0}")]
    Http(String),

    /// The node answered with a JSON-RPC `error` member.
    #[error("node returned error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("no response within {ms}ms")]
    Timeout { ms: u64 },

    #[error("malformed response: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether repeating the same round trip could succeed.
    ///
    /// The engine never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }

    /// A revert or other failure the node reported after executing the call.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

/// Errors produced by call registration, batch execution and scheduling.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Arguments could not be encoded, or return data could not be decoded,
    /// for the target's interface.
    #[error("Encoding error: {reason}")]
    Encoding { reason: String },

    /// The aggregated round trip failed as a whole.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A strict batch had at least one failing sub-call.
    /// None of the batch's destination slots were written.
    #[error("Call {index} of {total} in strict batch failed")]
    PartialFailure { index: usize, total: usize },

    /// A shard could not be started (endpoint not ready).
    #[error("Shard {shard} could not be dispatched: {reason}")]
    ShardDispatch { shard: usize, reason: String },

    /// Adding another call would exceed the batch size limit.
    #[error("Batch is full ({limit} calls)")]
    BatchFull { limit: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A contract was requested that the registry does not hold.
    #[error("Contract {name} has not been loaded")]
    UnknownContract { name: String },

    /// A flexible-mode result handler rejected an item.
    #[error("Result handler failed for item {index}: {reason}")]
    Handler { index: usize, reason: String },

    /// A shard task panicked or was torn down by the runtime.
    #[error("Shard task failed: {0}")]
    TaskFailed(String),
}

impl QueryError {
    pub fn encoding(reason: impl Into<String>) -> Self {
        Self::Encoding {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error came from the network rather than from
    /// local encoding or scheduling.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
