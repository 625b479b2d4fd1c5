//! The signed JSON records exchanged on the gateway WebSocket.
//!
//! Requests and responses share a flat base header; the nested tool-level
//! payload travels as a JSON *string* in `request`/`response` and is opaque
//! to this layer. `sign` covers every other field of the flattened record,
//! keyed by the per-session token.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::sign::EnvelopeSigner;

/// Operation selectors delivered by the gateway.
pub mod method {
    /// Enumerate the tool catalog of the local tool server.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Invoke a single tool on the local tool server.
    pub const TOOLS_CALL: &str = "tools/call";
    /// Server-initiated, non-recoverable termination. Carries no response.
    pub const KICKOUT: &str = "root/kickout";
    /// Server-initiated request to reconnect. Carries no response.
    pub const MIGRATE: &str = "root/migrate";
    /// Gateway-side error notice. Carries no response.
    pub const SYS_ERROR: &str = "sys/error";
}

/// Current unix time in milliseconds, as the wire's string form.
pub fn now_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .to_string()
}

/// Header fields shared by requests and responses.
///
/// Every field defaults so that a frame missing fields still decodes; the
/// holes then fail signature verification instead of aborting the parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseMessage {
    /// Server-issued correlation id, echoed unchanged in the response.
    #[serde(default)]
    pub request_id: String,
    /// Echoed identifier of the SDK instance.
    #[serde(default)]
    pub endpoint: String,
    /// Protocol version tag.
    #[serde(default)]
    pub version: String,
    /// Operation selector, see [`method`].
    #[serde(default)]
    pub method: String,
    /// Unix-millisecond timestamp emitted by the sender.
    #[serde(default, rename = "ts")]
    pub timestamp: String,
    /// Hex HMAC-SHA256 over the canonicalised payload.
    #[serde(default)]
    pub sign: String,
}

impl BaseMessage {
    fn sign_payload(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("request_id".to_owned(), self.request_id.clone()),
            ("endpoint".to_owned(), self.endpoint.clone()),
            ("version".to_owned(), self.version.clone()),
            ("method".to_owned(), self.method.clone()),
            ("ts".to_owned(), self.timestamp.clone()),
        ])
    }
}

/// A tool-invocation request delivered by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRequest {
    #[serde(flatten)]
    pub base: BaseMessage,
    /// Nested tool-level payload, as a JSON string.
    #[serde(default)]
    pub request: String,
}

impl GatewayRequest {
    /// Build an empty request for `method` with a fresh timestamp.
    pub fn new(method: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            base: BaseMessage {
                method: method.into(),
                version: version.into(),
                timestamp: now_millis(),
                ..BaseMessage::default()
            },
            request: String::new(),
        }
    }

    fn sign_payload(&self) -> BTreeMap<String, String> {
        let mut payload = self.base.sign_payload();
        payload.insert("request".to_owned(), self.request.clone());
        payload
    }

    /// Set `sign` in place, keyed by the session token.
    pub fn sign(&mut self, token: &str) {
        self.base.sign = EnvelopeSigner::new(self.sign_payload(), token).sign();
    }

    /// Recompute the signature and compare with the carried one.
    pub fn verify(&self, token: &str) -> bool {
        EnvelopeSigner::new(self.sign_payload(), token).verify(&self.base.sign)
    }

    /// Compact-JSON wire form.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    /// Parse a wire frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}

/// The bridge's reply to a [`GatewayRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(flatten)]
    pub base: BaseMessage,
    /// Nested tool-level payload, as a JSON string.
    #[serde(default)]
    pub response: String,
}

impl GatewayResponse {
    /// Build the reply to `request`, inheriting its base header verbatim.
    ///
    /// The timestamp is the request's own, not a fresh one, so the gateway
    /// correlates on an unchanged base. The signature is cleared; call
    /// [`GatewayResponse::sign`] once the response body is final.
    pub fn replying_to(request: &GatewayRequest, response: impl Into<String>) -> Self {
        Self {
            base: BaseMessage {
                sign: String::new(),
                ..request.base.clone()
            },
            response: response.into(),
        }
    }

    fn sign_payload(&self) -> BTreeMap<String, String> {
        let mut payload = self.base.sign_payload();
        payload.insert("response".to_owned(), self.response.clone());
        payload
    }

    /// Set `sign` in place, keyed by the session token.
    pub fn sign(&mut self, token: &str) {
        self.base.sign = EnvelopeSigner::new(self.sign_payload(), token).sign();
    }

    /// Recompute the signature and compare with the carried one.
    pub fn verify(&self, token: &str) -> bool {
        EnvelopeSigner::new(self.sign_payload(), token).verify(&self.base.sign)
    }

    /// Compact-JSON wire form.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    /// Parse a wire frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}
