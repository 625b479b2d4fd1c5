//! # Iris Bridge
//!
//! Client-side bridge runtime that connects a locally hosted MCP tool server
//! to a cloud gateway over an authenticated, persistently held WebSocket.
//! The gateway forwards tool-invocation requests from third-party agents;
//! the bridge dispatches them to the local tool server, signs the responses
//! and returns them on the same socket.
//!
//! ## Features
//!
//! - **Signed transport**: every envelope carries an HMAC-SHA256 signature
//!   keyed by a per-session registration token
//! - **Persistent session**: read/write pumps, ping cycle and a bounded
//!   outbound queue over one WebSocket
//! - **Self-healing**: exponential-backoff reconnection with jitter, driven
//!   by an internal event loop; server-initiated migrate and kickout
//! - **Local tool server**: dialed over SSE/HTTP with the official MCP
//!   client, or embedded directly as a [`ToolService`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use iris_bridge::{start_bridge, BridgeConfig};
//!
//! #[tokio::main]
//! async fn main() -> iris_bridge::Result<()> {
//!     let config = BridgeConfig::load()?;
//!     let bridge = start_bridge(config).await?;
//!     bridge.stopped().cancelled().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod backoff;
pub mod bridge;
pub mod builder;
pub mod config;
pub mod error;
mod events;
mod handler;
pub mod session;
pub mod tool_client;

pub use auth::Authenticator;
pub use bridge::{Bridge, BridgeStatus};
pub use builder::BridgeBuilder;
pub use config::{BridgeConfig, ReconnectConfig, SessionConfig};
pub use error::{BridgeError, Result};
pub use session::Session;
pub use tool_client::{ToolServerClient, ToolService};

/// Build and start a bridge from a configuration record.
///
/// Convenience wrapper over [`BridgeBuilder`]: the error of the first
/// connection attempt is returned here; later failures are retried in the
/// background with backoff.
pub async fn start_bridge(config: BridgeConfig) -> Result<Bridge> {
    let bridge = BridgeBuilder::new().config(config).build()?;
    bridge.run().await?;
    Ok(bridge)
}
