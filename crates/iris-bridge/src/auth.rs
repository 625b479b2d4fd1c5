//! Registration and WebSocket-upgrade authentication.
//!
//! A signed GET against `/v1/client/registration` exchanges the credential
//! pair for a per-session `{token, client_id}`. The token then keys every
//! envelope signature on that session, including the signed header set of
//! the WebSocket upgrade itself.

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use iris_core::now_millis;
use iris_core::sign::{RestSigner, SIGN_METHOD};

use crate::error::{BridgeError, Result};

const REGISTRATION_PATH: &str = "/v1/client/registration";
const CONNECT_PATH: &str = "/ws/mcp";

/// Token material issued by the registration endpoint. Bound to a single
/// WebSocket session; a fresh one is obtained on every reconnect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenData {
    /// HMAC key for all subsequent message signing on this session.
    pub token: String,
    /// Identifier the gateway routes this client by.
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: TokenData,
}

/// Exchanges credentials for session tokens and produces the signed
/// WebSocket upgrade request.
#[derive(Debug)]
pub struct Authenticator {
    endpoint: Url,
    access_id: String,
    access_secret: String,
    http: reqwest::Client,
    data: Option<TokenData>,
}

impl Authenticator {
    /// Create an authenticator against `endpoint` (an http/https base URL).
    pub fn new(
        endpoint: &str,
        access_id: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| BridgeError::InvalidConfig(format!("bad endpoint url: {e}")))?;
        Ok(Self {
            endpoint,
            access_id: access_id.into(),
            access_secret: access_secret.into(),
            http: reqwest::Client::new(),
            data: None,
        })
    }

    fn base_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("access_id", self.access_id.clone()),
            ("t", now_millis()),
            ("nonce", Uuid::new_v4().simple().to_string()),
            ("sign_method", SIGN_METHOD.to_owned()),
        ]
    }

    /// Issue the signed registration call and store the resulting token.
    pub async fn authenticate(&mut self) -> Result<()> {
        let mut url = self.endpoint.clone();
        url.set_path(REGISTRATION_PATH);

        let mut headers = self.base_headers();
        let sign = RestSigner::new(&self.access_secret)
            .with_headers(headers.iter().map(|(k, v)| (*k, v.clone())))
            .with_path(url.path())
            .sign();
        headers.push(("sign", sign));

        debug!(%url, "requesting registration");

        let mut request = self
            .http
            .get(url)
            .header(http::header::CONTENT_TYPE, "application/json");
        for (name, value) in &headers {
            request = request.header(*name, value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::AuthenticationFailed(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::AuthenticationFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(BridgeError::AuthenticationFailed(format!(
                "registration returned {status}: {body}"
            )));
        }

        let parsed: RegistrationResponse = serde_json::from_str(&body)
            .map_err(|e| BridgeError::AuthenticationFailed(format!("bad body: {e}")))?;
        if !parsed.success || parsed.data.token.is_empty() || parsed.data.client_id.is_empty() {
            return Err(BridgeError::AuthenticationFailed(format!(
                "registration rejected: {body}"
            )));
        }

        info!(client_id = %parsed.data.client_id, "registered with gateway");
        self.data = Some(parsed.data);
        Ok(())
    }

    /// The session token, once [`authenticate`](Self::authenticate) has
    /// succeeded.
    pub fn token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.token.as_str())
    }

    /// Drop the held token. Used on terminal teardown.
    pub fn clear(&mut self) {
        self.data = None;
    }

    /// The WebSocket upgrade URL and its signed header set.
    ///
    /// The signature covers the upgrade's query string and path, keyed by
    /// the session token. Fails with [`BridgeError::NotAuthenticated`] until
    /// a registration has succeeded.
    pub fn connect_request(&self) -> Result<(Url, Vec<(&'static str, String)>)> {
        let data = self.data.as_ref().ok_or(BridgeError::NotAuthenticated)?;

        let mut url = self.endpoint.clone();
        let scheme = match url.scheme() {
            "http" => "ws".to_string(),
            "https" => "wss".to_string(),
            other => other.to_string(),
        };
        // Infallible for http(s) bases: both sides are "special" schemes.
        let _ = url.set_scheme(&scheme);
        url.set_path(CONNECT_PATH);
        url.query_pairs_mut()
            .clear()
            .append_pair("client_id", &data.client_id);

        let mut headers = self.base_headers();
        let sign = RestSigner::new(&data.token)
            .with_headers(headers.iter().map(|(k, v)| (*k, v.clone())))
            .with_query([("client_id", data.client_id.clone())])
            .with_path(CONNECT_PATH)
            .sign();
        headers.push(("sign", sign));

        debug!(%url, "prepared websocket upgrade");
        Ok((url, headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated(endpoint: &str) -> Authenticator {
        let mut auth = Authenticator::new(endpoint, "id", "secret").unwrap();
        auth.data = Some(TokenData {
            token: "tok".into(),
            client_id: "cid".into(),
        });
        auth
    }

    #[test]
    fn connect_request_requires_registration() {
        let auth = Authenticator::new("https://gw.example.com", "id", "secret").unwrap();
        assert!(matches!(
            auth.connect_request(),
            Err(BridgeError::NotAuthenticated)
        ));
    }

    #[test]
    fn connect_url_swaps_scheme_and_carries_client_id() {
        let (url, headers) = authenticated("https://gw.example.com").connect_request().unwrap();
        assert_eq!(url.as_str(), "wss://gw.example.com/ws/mcp?client_id=cid");

        let (url, _) = authenticated("http://127.0.0.1:9000").connect_request().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9000/ws/mcp?client_id=cid");

        let names: Vec<_> = headers.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, ["access_id", "t", "nonce", "sign_method", "sign"]);
    }

    #[test]
    fn upgrade_signature_is_keyed_by_the_token() {
        let (_, headers) = authenticated("https://gw.example.com").connect_request().unwrap();
        let header_map: std::collections::HashMap<_, _> =
            headers.iter().map(|(k, v)| (*k, v.clone())).collect();

        let recomputed = RestSigner::new("tok")
            .with_headers(headers.iter().filter(|(k, _)| *k != "sign").map(|(k, v)| (*k, v.clone())))
            .with_query([("client_id", "cid")])
            .with_path(CONNECT_PATH)
            .sign();
        assert_eq!(header_map["sign"], recomputed);
    }

    #[test]
    fn nonce_is_32_hex_chars() {
        let auth = Authenticator::new("https://gw.example.com", "id", "secret").unwrap();
        let headers = auth.base_headers();
        let nonce = &headers.iter().find(|(k, _)| *k == "nonce").unwrap().1;
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn clear_drops_the_token() {
        let mut auth = authenticated("https://gw.example.com");
        assert!(auth.token().is_some());
        auth.clear();
        assert!(auth.token().is_none());
        assert!(auth.connect_request().is_err());
    }
}
