//! # Iris Core
//!
//! Wire-level building blocks for the Iris gateway bridge: the signed
//! request/response envelope exchanged on the gateway WebSocket, and the
//! HMAC-SHA256 canonicalisation used for both the REST registration call and
//! the WebSocket payloads.
//!
//! This crate performs no I/O. Everything here is deterministic and
//! synchronous so the transport layers in `iris-bridge` stay thin.

pub mod envelope;
pub mod error;
pub mod sign;

pub use envelope::{method, now_millis, BaseMessage, GatewayRequest, GatewayResponse};
pub use error::WireError;
pub use sign::{EnvelopeSigner, RestSigner};
