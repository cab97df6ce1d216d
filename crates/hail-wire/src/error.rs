//! Error types for the hail protocol.
//!
//! Cancellation (a peer reporting itself unhealthy) is deliberately absent:
//! it is a planned termination reported as normal stream completion, never
//! an error. Source exhaustion on the ingestion side is likewise not an
//! error. Per-stream failures are isolated; only `Transport`, `Protocol`,
//! and handshake failures are fatal to a connection.

use crate::frame::ErrorCode;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the protocol core and both binaries.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The handshake was rejected. Fatal to the connection, never retried
    /// by the core.
    #[error("authentication rejected: {reason}")]
    Auth { reason: String },

    /// No handler is registered for the requested route. Terminates only
    /// the requesting stream.
    #[error("no handler registered for route `{route}`")]
    RouteNotFound { route: String },

    /// A payload could not be encoded or decoded. Terminates only the
    /// affected stream.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connection-level I/O fault.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Internal channel send/receive failure between tasks.
    #[error("channel error: {context}")]
    Channel { context: String },

    /// The peer violated the framing rules (e.g. a handshake frame after
    /// the handshake, or a data frame for a stream it never opened).
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    /// The connection went away while streams were still pending.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A terminal error frame received from the peer for one stream.
    #[error("remote error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },
}

impl Error {
    /// Wire-level code carried in the terminal error frame for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::RouteNotFound { .. } => ErrorCode::RouteNotFound,
            Error::Serialization(_) => ErrorCode::Serialization,
            Error::Remote { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }
}
