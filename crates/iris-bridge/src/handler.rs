//! Inbound frame dispatch.
//!
//! Every application frame on the session runs through here: decode, verify,
//! route. Tool invocations go to the tool-server client and come back as
//! signed response envelopes; control methods become internal events. Frames
//! that fail decoding or verification are dropped without a reply — the
//! gateway reissues pending work.

use std::sync::Arc;

use rmcp::model::{CallToolRequestParam, CallToolResult, Content, PaginatedRequestParam};
use tracing::{debug, error, info, warn};

use iris_core::envelope::{method, GatewayRequest, GatewayResponse};

use crate::events::{Event, EventSender};
use crate::tool_client::ToolService;

/// Routes verified gateway requests onto the tool-server client.
///
/// Stateless and re-entrant; one is built per session, bound to that
/// session's token. It runs on the read pump, so a long tool call delays
/// subsequent frames on the same connection.
pub(crate) struct Dispatcher {
    tools: Arc<dyn ToolService>,
    token: String,
    events: EventSender,
}

impl Dispatcher {
    pub(crate) fn new(tools: Arc<dyn ToolService>, token: String, events: EventSender) -> Self {
        Self {
            tools,
            token,
            events,
        }
    }

    /// Handle one inbound frame. Returns the signed reply to write back, if
    /// the method produces one.
    pub(crate) async fn dispatch(&self, payload: &[u8]) -> Option<String> {
        let request = match GatewayRequest::decode(payload) {
            Ok(request) => request,
            Err(err) => {
                error!(%err, "dropping undecodable frame");
                return None;
            }
        };

        if !request.verify(&self.token) {
            warn!(
                request_id = %request.base.request_id,
                method = %request.base.method,
                "signature verification failed, dropping frame"
            );
            return None;
        }

        debug!(
            request_id = %request.base.request_id,
            method = %request.base.method,
            "gateway request verified"
        );

        match request.base.method.as_str() {
            method::TOOLS_LIST => self.list_tools(&request).await,
            method::TOOLS_CALL => self.call_tool(&request).await,
            method::KICKOUT => {
                warn!("gateway kicked this client out");
                self.events.send(Event::Kickout);
                None
            }
            method::MIGRATE => {
                info!("gateway requested migration");
                self.events.send(Event::Migrate);
                None
            }
            method::SYS_ERROR => {
                warn!(notice = %request.request, "gateway error notice");
                None
            }
            other => {
                warn!(method = %other, "unknown method, dropping frame");
                None
            }
        }
    }

    async fn list_tools(&self, request: &GatewayRequest) -> Option<String> {
        let params: Option<PaginatedRequestParam> = match serde_json::from_str(&request.request) {
            Ok(params) => params,
            Err(err) => {
                error!(%err, "bad list-tools request payload");
                return None;
            }
        };

        let result = match self.tools.list_tools(params).await {
            Ok(result) => result,
            Err(err) => {
                error!(%err, "list tools failed");
                return None;
            }
        };

        let body = match serde_json::to_string(&result) {
            Ok(body) => body,
            Err(err) => {
                error!(%err, "failed to serialise tool catalog");
                return None;
            }
        };
        self.reply(request, body)
    }

    async fn call_tool(&self, request: &GatewayRequest) -> Option<String> {
        let params: CallToolRequestParam = match serde_json::from_str(&request.request) {
            Ok(params) => params,
            Err(err) => {
                error!(%err, "bad call-tool request payload");
                return None;
            }
        };

        // A failing tool is not a failing bridge: the error rides inside a
        // successful, signed response envelope.
        let result = match self.tools.call_tool(params).await {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, request_id = %request.base.request_id, "tool invocation failed");
                CallToolResult::error(vec![Content::text(err.to_string())])
            }
        };

        let body = match serde_json::to_string(&result) {
            Ok(body) => body,
            Err(err) => {
                error!(%err, "failed to serialise tool result");
                return None;
            }
        };
        self.reply(request, body)
    }

    fn reply(&self, request: &GatewayRequest, body: String) -> Option<String> {
        let mut response = GatewayResponse::replying_to(request, body);
        response.sign(&self.token);
        match response.encode() {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                error!(%err, "failed to encode response envelope");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use rmcp::model::ListToolsResult;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::error::{BridgeError, Result};

    const TOKEN: &str = "test-token";

    /// Scriptable stand-in for the local tool server.
    struct MockTools {
        call_error: Option<String>,
    }

    #[async_trait]
    impl ToolService for MockTools {
        async fn list_tools(
            &self,
            _request: Option<PaginatedRequestParam>,
        ) -> Result<ListToolsResult> {
            let catalog = json!({
                "tools": [{
                    "name": "hello",
                    "description": "Say hello",
                    "inputSchema": {"type": "object"}
                }]
            });
            Ok(serde_json::from_value(catalog).expect("static catalog"))
        }

        async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult> {
            if let Some(text) = &self.call_error {
                return Err(BridgeError::ToolServer(text.clone()));
            }
            Ok(CallToolResult::success(vec![Content::text(format!(
                "ran {}",
                request.name
            ))]))
        }

        async fn close(&self) {}
    }

    fn dispatcher(call_error: Option<&str>) -> (Dispatcher, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(
            Arc::new(MockTools {
                call_error: call_error.map(str::to_owned),
            }),
            TOKEN.to_owned(),
            EventSender::new(tx, CancellationToken::new()),
        );
        (dispatcher, rx)
    }

    fn signed_request(method_name: &str, payload: &str) -> GatewayRequest {
        let mut request = GatewayRequest::new(method_name, "1.0");
        request.base.request_id = "r1".into();
        request.base.endpoint = "sdk-under-test".into();
        request.base.timestamp = "1".into();
        request.request = payload.into();
        request.sign(TOKEN);
        request
    }

    async fn dispatch(dispatcher: &Dispatcher, request: &GatewayRequest) -> Option<GatewayResponse> {
        let bytes = request.encode().unwrap().into_bytes();
        dispatcher
            .dispatch(&bytes)
            .await
            .map(|reply| GatewayResponse::decode(reply.as_bytes()).unwrap())
    }

    #[tokio::test]
    async fn happy_tools_list() {
        let (dispatcher, _rx) = dispatcher(None);
        let request = signed_request(method::TOOLS_LIST, "{}");

        let response = dispatch(&dispatcher, &request).await.expect("a reply");
        assert_eq!(response.base.request_id, "r1");
        assert_eq!(response.base.timestamp, "1");
        assert_eq!(response.base.method, method::TOOLS_LIST);
        assert!(response.verify(TOKEN));

        let body: serde_json::Value = serde_json::from_str(&response.response).unwrap();
        assert_eq!(body["tools"][0]["name"], "hello");
    }

    #[tokio::test]
    async fn flipped_signature_is_dropped() {
        let (dispatcher, _rx) = dispatcher(None);
        let mut request = signed_request(method::TOOLS_LIST, "{}");
        let mut sign = request.base.sign.clone().into_bytes();
        sign[0] = if sign[0] == b'A' { b'B' } else { b'A' };
        request.base.sign = String::from_utf8(sign).unwrap();

        assert!(dispatch(&dispatcher, &request).await.is_none());
    }

    #[tokio::test]
    async fn tool_error_is_surfaced_in_a_valid_envelope() {
        let (dispatcher, _rx) = dispatcher(Some("boom"));
        let request = signed_request(method::TOOLS_CALL, r#"{"name":"hello"}"#);

        let response = dispatch(&dispatcher, &request).await.expect("a reply");
        assert!(response.verify(TOKEN));

        let body: serde_json::Value = serde_json::from_str(&response.response).unwrap();
        assert_eq!(body["isError"], json!(true));
        assert_eq!(body["content"][0]["type"], "text");
        assert_eq!(body["content"][0]["text"], "boom");
    }

    #[tokio::test]
    async fn successful_call_replies_with_tool_output() {
        let (dispatcher, _rx) = dispatcher(None);
        let request = signed_request(method::TOOLS_CALL, r#"{"name":"hello","arguments":{}}"#);

        let response = dispatch(&dispatcher, &request).await.expect("a reply");
        let body: serde_json::Value = serde_json::from_str(&response.response).unwrap();
        assert_eq!(body["content"][0]["text"], "ran hello");
        assert!(response.verify(TOKEN));
    }

    #[tokio::test]
    async fn kickout_emits_event_without_reply() {
        let (dispatcher, mut rx) = dispatcher(None);
        let request = signed_request(method::KICKOUT, "");

        assert!(dispatch(&dispatcher, &request).await.is_none());
        assert_eq!(rx.recv().await, Some(Event::Kickout));
    }

    #[tokio::test]
    async fn migrate_emits_event_without_reply() {
        let (dispatcher, mut rx) = dispatcher(None);
        let request = signed_request(method::MIGRATE, "");

        assert!(dispatch(&dispatcher, &request).await.is_none());
        assert_eq!(rx.recv().await, Some(Event::Migrate));
    }

    #[tokio::test]
    async fn sys_error_and_unknown_methods_are_dropped() {
        let (dispatcher, mut rx) = dispatcher(None);

        let notice = signed_request(method::SYS_ERROR, r#"{"reason":"overload"}"#);
        assert!(dispatch(&dispatcher, &notice).await.is_none());

        let unknown = signed_request("tools/unknown", "{}");
        assert!(dispatch(&dispatcher, &unknown).await.is_none());

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn undecodable_frames_are_dropped() {
        let (dispatcher, _rx) = dispatcher(None);
        assert!(dispatcher.dispatch(b"\x00\x01 not json").await.is_none());
    }

    #[tokio::test]
    async fn bad_tool_payload_is_dropped() {
        let (dispatcher, _rx) = dispatcher(None);
        // tools/call requires a tool name; an unparseable payload is dropped.
        let request = signed_request(method::TOOLS_CALL, "not-json");
        assert!(dispatch(&dispatcher, &request).await.is_none());
    }
}
