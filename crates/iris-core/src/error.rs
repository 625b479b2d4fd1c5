//! Error types for the wire layer.

use thiserror::Error;

/// Errors produced by the envelope codec.
#[derive(Error, Debug)]
pub enum WireError {
    /// The inbound frame was not a JSON envelope at all.
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),

    /// An envelope could not be serialised for the wire.
    #[error("envelope serialisation failed: {0}")]
    Encode(#[source] serde_json::Error),
}
