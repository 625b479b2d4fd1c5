//! Bridge configuration.
//!
//! The caller-facing record carries the four values the reference deployment
//! needs: the credential pair, the platform endpoint and the local
//! tool-server endpoint. It loads from a YAML file (path in `IRIS_CONFIG`,
//! default `config.yaml`) layered under environment variables
//! (`ACCESS_ID`, `ACCESS_SECRET`, `ENDPOINT`, `TOOL_SERVER_ENDPOINT`).
//!
//! Session and reconnect tuning have wire-protocol defaults and are adjusted
//! through [`BridgeBuilder`](crate::BridgeBuilder), not the config file.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Caller-supplied credentials and endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    /// Public access id issued by the platform.
    pub access_id: String,
    /// Access secret; never transmitted, only used as the HMAC key for the
    /// registration call.
    pub access_secret: String,
    /// Platform endpoint base URL (http/https).
    pub endpoint: String,
    /// Local tool-server URL the embedded tool client dials.
    #[serde(default)]
    pub tool_server_endpoint: String,
}

impl BridgeConfig {
    /// Load from the YAML file named by `IRIS_CONFIG` (default
    /// `config.yaml`), with environment variables taking precedence.
    pub fn load() -> Result<Self> {
        let path = std::env::var("IRIS_CONFIG").unwrap_or_else(|_| "config.yaml".to_owned());

        let cfg: Self = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::default())
            .build()
            .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?
            .try_deserialize()
            .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check that every required field is present.
    pub fn validate(&self) -> Result<()> {
        if self.access_id.is_empty() {
            return Err(BridgeError::InvalidConfig("access_id is required".into()));
        }
        if self.access_secret.is_empty() {
            return Err(BridgeError::InvalidConfig("access_secret is required".into()));
        }
        if self.endpoint.is_empty() {
            return Err(BridgeError::InvalidConfig("endpoint is required".into()));
        }
        Ok(())
    }
}

/// Timing and capacity knobs for a single WebSocket session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-frame write deadline.
    pub write_wait: Duration,
    /// How long a pong may take before the connection counts as dead.
    pub pong_wait: Duration,
    /// Interval between outgoing pings; must be below `pong_wait`.
    pub ping_period: Duration,
    /// Upper bound on a single inbound frame, if any.
    pub max_message_size: Option<usize>,
    /// Capacity of the outbound queue.
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(60),
            pong_wait,
            // 0.9 x pong_wait, so a ping is always in flight before the
            // read deadline can fire.
            ping_period: Duration::from_secs(pong_wait.as_secs() * 9 / 10),
            max_message_size: None,
            outbound_buffer: 1024,
        }
    }
}

impl SessionConfig {
    /// The read deadline: a frame must arrive within this window.
    pub fn read_deadline(&self) -> Duration {
        self.pong_wait + self.ping_period
    }
}

/// Reconnection backoff policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// First retry delay.
    pub initial_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Attempt ceiling; `None` retries until kickout or process exit.
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            max_attempts: None,
        }
    }
}
