use thiserror::Error;

/// Alias for a `Result` with the error type [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the front-end handles of the transaction worker.
///
/// Transaction outcomes are never reported through this type; they arrive as
/// [`TxEvent`](crate::TxEvent)s on the transaction's handle.
#[derive(Debug, Error)]
pub enum Error {
    /// The worker is not running anymore.
    #[error("transaction worker stopped")]
    TxWorkerStopped,

    /// The worker's request queue is at capacity.
    #[error("transaction queue full")]
    QueueFull,
}

/// Transport level failure of an RPC call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The server is connected but has no network connectivity itself.
    #[error("server reports no network")]
    NoNetwork,

    /// The request never produced a response.
    #[error("transport failure: {message}")]
    Transport {
        /// Human-readable description.
        message: String,
    },

    /// The server answered with an RPC error.
    #[error("rpc error {error}: {message}")]
    Remote {
        /// Error token reported by the server.
        error: String,
        /// Error message reported by the server.
        message: String,
    },
}

impl RpcError {
    /// Returns `true` for the transient `noNetwork` condition.
    pub fn is_no_network(&self) -> bool {
        matches!(self, RpcError::NoNetwork)
    }
}

/// Failure of the signing collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("signing failed: {message}")]
pub struct SignError {
    /// Human-readable description.
    pub message: String,
}

impl SignError {
    /// Create a signing error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal submit failure reported with [`TxEvent::SubmitError`](crate::TxEvent::SubmitError).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The submit call failed at the transport level.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The transaction could not be signed for the requested fee and sequence.
    #[error(transparent)]
    Sign(#[from] SignError),
}
