//! Error types for the bridge runtime.

use thiserror::Error;

/// Main error type for bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The registration call failed: transport error, non-2xx status,
    /// unparseable body or `success=false`.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A WebSocket upgrade was requested before a successful registration.
    #[error("not authenticated: no registration token held")]
    NotAuthenticated,

    /// The WebSocket dial was rejected or the TCP connection failed.
    #[error("websocket dial failed: {0}")]
    DialFailed(String),

    /// Enqueue attempted on a session that has been closed.
    #[error("session is closed")]
    SessionClosed,

    /// The outbound queue was torn down while an enqueue was in flight.
    #[error("tried to write to a closed session")]
    WriteClosed,

    /// Read or write failure on a live socket.
    #[error("socket error: {0}")]
    Socket(String),

    /// The local tool server rejected or failed a call. The message is the
    /// tool-level error text, surfaced verbatim to the gateway.
    #[error("{0}")]
    ToolServer(String),

    /// A required configuration field is missing or unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Envelope codec failure.
    #[error(transparent)]
    Wire(#[from] iris_core::WireError),

    /// The retry budget ran out before an operation succeeded.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: usize,
        /// The error from the final attempt.
        last_error: String,
    },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
