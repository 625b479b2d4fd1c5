//! Client for the local tool server.
//!
//! The bridge consumes a minimal surface of the tool server — list the
//! catalog, invoke one tool — expressed as the [`ToolService`] trait so the
//! dispatcher can be exercised against a mock. The production implementation
//! dials the server's SSE endpoint with the official MCP client.

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, ListToolsResult, PaginatedRequestParam};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::SseClientTransport;
use rmcp::ServiceExt;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// The tool-server operations the bridge consumes.
#[async_trait]
pub trait ToolService: Send + Sync {
    /// Enumerate the tool catalog.
    async fn list_tools(&self, request: Option<PaginatedRequestParam>)
        -> Result<ListToolsResult>;

    /// Invoke a single tool.
    async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult>;

    /// Release the underlying connection. Idempotent.
    async fn close(&self);
}

/// MCP client speaking SSE/HTTP to the locally hosted tool server.
pub struct ToolServerClient {
    service: RunningService<RoleClient, ()>,
}

impl ToolServerClient {
    /// Dial `endpoint` (the tool server's SSE URL) and run the MCP
    /// initialize handshake.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let transport = SseClientTransport::start(endpoint.to_owned())
            .await
            .map_err(|e| BridgeError::ToolServer(format!("transport to {endpoint}: {e}")))?;
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| BridgeError::ToolServer(format!("initialize against {endpoint}: {e}")))?;

        info!(%endpoint, "connected to tool server");
        Ok(Self { service })
    }
}

#[async_trait]
impl ToolService for ToolServerClient {
    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult> {
        self.service
            .list_tools(request)
            .await
            .map_err(|e| BridgeError::ToolServer(format!("list tools: {e}")))
    }

    async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult> {
        debug!(tool = %request.name, "invoking tool");
        self.service
            .call_tool(request)
            .await
            .map_err(|e| BridgeError::ToolServer(format!("call tool: {e}")))
    }

    async fn close(&self) {
        self.service.cancellation_token().cancel();
    }
}
