//! Demo Tool Server
//!
//! A small MCP tool server the bridge can dial locally. The tool host is
//! constructed explicitly and owns its state; nothing lives in process-wide
//! globals, and ctrl-c releases the listener.
//!
//! Run with: cargo run --example tool_server

use std::sync::{Arc, Mutex};

use anyhow::Result;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
    ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::transport::sse_server::SseServer;
use rmcp::{ErrorData, RoleServer, ServerHandler};
use tracing::info;

const BIND_ADDRESS: &str = "127.0.0.1:8787";

/// An explicitly constructed tool host with a tiny in-memory note store.
#[derive(Clone)]
struct ToolHost {
    notes: Arc<Mutex<Vec<String>>>,
}

impl ToolHost {
    fn new() -> Self {
        Self {
            notes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn tool(name: &'static str, description: &'static str, schema: serde_json::Value) -> Tool {
        let schema = match schema {
            serde_json::Value::Object(obj) => Arc::new(obj),
            _ => Arc::new(serde_json::Map::new()),
        };
        Tool::new(name, description, schema)
    }

    fn remember(&self, text: String) -> String {
        let mut notes = self.notes.lock().expect("note store lock");
        notes.push(text);
        format!("stored note #{}", notes.len())
    }

    fn recall(&self) -> String {
        let notes = self.notes.lock().expect("note store lock");
        if notes.is_empty() {
            "no notes stored".to_owned()
        } else {
            notes.join("\n")
        }
    }
}

impl ServerHandler for ToolHost {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "iris-demo-tools".to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                title: Some("Iris Demo Tool Server".to_owned()),
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Demo tool server for the Iris bridge - stores and recalls short notes"
                    .to_owned(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: vec![
                Self::tool(
                    "remember",
                    "Store a short note",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "text": {"type": "string", "description": "The note to store"}
                        },
                        "required": ["text"]
                    }),
                ),
                Self::tool(
                    "recall",
                    "Return every stored note",
                    serde_json::json!({"type": "object", "properties": {}}),
                ),
            ],
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        match request.name.as_ref() {
            "remember" => {
                let text = request
                    .arguments
                    .as_ref()
                    .and_then(|args| args.get("text"))
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_owned();
                if text.is_empty() {
                    return Ok(CallToolResult::error(vec![Content::text(
                        "remember requires a non-empty 'text' argument",
                    )]));
                }
                Ok(CallToolResult::success(vec![Content::text(
                    self.remember(text),
                )]))
            }
            "recall" => Ok(CallToolResult::success(vec![Content::text(self.recall())])),
            other => Ok(CallToolResult::error(vec![Content::text(format!(
                "unknown tool: {other}"
            ))])),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("tool_server=debug,rmcp=info")
        .init();

    let host = ToolHost::new();
    let shutdown = SseServer::serve(BIND_ADDRESS.parse()?)
        .await?
        .with_service(move || host.clone());

    info!("demo tool server listening on http://{BIND_ADDRESS}/sse");

    tokio::signal::ctrl_c().await?;
    shutdown.cancel();
    info!("demo tool server stopped");
    Ok(())
}
