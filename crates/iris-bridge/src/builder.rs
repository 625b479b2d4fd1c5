//! Builder pattern for creating and configuring bridges.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::bridge::Bridge;
use crate::config::{BridgeConfig, ReconnectConfig, SessionConfig};
use crate::error::{BridgeError, Result};
use crate::tool_client::ToolService;

/// Fluent construction of a [`Bridge`].
///
/// # Example
///
/// ```no_run
/// use iris_bridge::BridgeBuilder;
///
/// #[tokio::main]
/// async fn main() -> iris_bridge::Result<()> {
///     let bridge = BridgeBuilder::new()
///         .access_params("my-access-id", "my-access-secret", "https://gateway.example.com")
///         .tool_server_endpoint("http://127.0.0.1:8787/sse")
///         .build()?;
///
///     bridge.run().await?;
///     Ok(())
/// }
/// ```
#[derive(Default)]
pub struct BridgeBuilder {
    config: Option<BridgeConfig>,
    session: SessionConfig,
    reconnect: ReconnectConfig,
    tools: Option<Arc<dyn ToolService>>,
}

impl BridgeBuilder {
    /// Create a builder with default session and reconnect tuning.
    pub fn new() -> Self {
        Self {
            config: None,
            session: SessionConfig::default(),
            reconnect: ReconnectConfig::default(),
            tools: None,
        }
    }

    /// Supply a complete configuration record, e.g. from
    /// [`BridgeConfig::load`].
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the platform credentials and endpoint.
    pub fn access_params(
        mut self,
        access_id: impl Into<String>,
        access_secret: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let config = self.config.get_or_insert_with(BridgeConfig::default);
        config.access_id = access_id.into();
        config.access_secret = access_secret.into();
        config.endpoint = endpoint.into();
        self
    }

    /// Set the local tool-server URL the bridge dials.
    pub fn tool_server_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config
            .get_or_insert_with(BridgeConfig::default)
            .tool_server_endpoint = endpoint.into();
        self
    }

    /// Override the per-session timing and capacity knobs.
    pub fn session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Override the reconnection backoff policy.
    pub fn reconnect_config(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Hand the bridge an already-constructed tool host instead of dialing
    /// `tool_server_endpoint`. The bridge releases it on shutdown.
    pub fn tool_service(mut self, tools: impl ToolService + 'static) -> Self {
        self.tools = Some(Arc::new(tools));
        self
    }

    /// Validate the configuration and create a [`Bridge`] ready to run.
    pub fn build(self) -> Result<Bridge> {
        let config = self.config.ok_or_else(|| {
            BridgeError::InvalidConfig("access credentials are required".into())
        })?;
        config.validate()?;

        if self.tools.is_none() && config.tool_server_endpoint.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "either tool_server_endpoint or an embedded tool service is required".into(),
            ));
        }

        let auth = Authenticator::new(&config.endpoint, config.access_id, config.access_secret)?;
        Ok(Bridge::new(
            auth,
            config.tool_server_endpoint,
            self.session,
            self.reconnect,
            self.tools,
        ))
    }
}
