//! HMAC-SHA256 canonicalisation and signing.
//!
//! Two signers share one primitive. [`RestSigner`] covers the registration
//! call and the WebSocket upgrade (headers, query, body, path);
//! [`EnvelopeSigner`] covers the flat key/value payload of a WebSocket
//! envelope. Digests are hex-uppercase; verification is a recomputation
//! followed by case-insensitive comparison, so either casing on the wire is
//! accepted.

use std::collections::{BTreeMap, HashMap};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::trace;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag carried in the `sign_method` header.
pub const SIGN_METHOD: &str = "HMAC-SHA256";

fn hmac_sha256_hex(key: &str, data: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data);
    hex::encode_upper(mac.finalize().into_bytes())
}

fn digests_match(computed: &str, candidate: &str) -> bool {
    computed.eq_ignore_ascii_case(candidate)
}

/// Signer for REST-style requests: the registration call and the WebSocket
/// upgrade handshake.
///
/// The canonical form concatenates, each line `\n`-terminated:
/// `access_id`, `t`, `sign_method` and `nonce` header values, then one
/// `name:value` line per header named in `signature_headers` (in listed
/// order), then — separated by blank lines — the sorted query string, the raw
/// body, and the request path.
#[derive(Debug, Clone, Default)]
pub struct RestSigner {
    key: String,
    headers: Option<HashMap<String, String>>,
    query: BTreeMap<String, Vec<String>>,
    payload: Vec<u8>,
    path: String,
}

impl RestSigner {
    /// Create a signer keyed by `key` (the access secret for registration,
    /// the session token for the upgrade).
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Attach the request headers. Names are matched case-insensitively.
    pub fn with_headers<K, V, I>(mut self, headers: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.headers = Some(
            headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        );
        self
    }

    /// Attach query parameters. Repeated keys are joined with `,` in the
    /// canonical form; keys are sorted ascending.
    pub fn with_query<K, V, I>(mut self, query: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in query {
            self.query.entry(k.into()).or_default().push(v.into());
        }
        self
    }

    /// Attach the raw request body.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Attach the request path (no scheme, host or query).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    fn header_str(&self) -> String {
        let Some(headers) = &self.headers else {
            return String::new();
        };

        let value = |name: &str| headers.get(name).cloned().unwrap_or_default();
        let mut out = format!(
            "{}\n{}\n{}\n{}\n",
            value("access_id"),
            value("t"),
            value("sign_method"),
            value("nonce"),
        );

        if let Some(listed) = headers.get("signature_headers") {
            for name in listed.split(',') {
                let name = name.trim().to_ascii_lowercase();
                if name.is_empty() {
                    continue;
                }
                out.push_str(&format!("{}:{}\n", name, value(&name).trim()));
            }
        }
        out
    }

    fn query_str(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        self.query
            .iter()
            .map(|(k, vs)| format!("{}={}", k, vs.join(",")))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// The exact byte string fed to the HMAC.
    pub fn canonical_string(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.header_str(),
            self.query_str(),
            self.payload_str(),
            self.path
        )
    }

    /// Compute the hex-uppercase signature.
    pub fn sign(&self) -> String {
        let canonical = self.canonical_string();
        let digest = hmac_sha256_hex(&self.key, canonical.as_bytes());
        trace!(%canonical, %digest, "signed rest request");
        digest
    }

    /// Recompute and compare against a presented signature.
    pub fn verify(&self, sign: &str) -> bool {
        digests_match(&self.sign(), sign)
    }
}

/// Signer for the flat key/value payload of a WebSocket envelope.
///
/// Keys are listed in ascending lexicographic order as `key:value` lines
/// joined by `\n` with no trailing newline. The `sign` key is always
/// excluded from the hashed input.
#[derive(Debug, Clone)]
pub struct EnvelopeSigner {
    payload: BTreeMap<String, String>,
    key: String,
}

impl EnvelopeSigner {
    pub fn new(payload: BTreeMap<String, String>, key: impl Into<String>) -> Self {
        Self {
            payload,
            key: key.into(),
        }
    }

    /// The exact byte string fed to the HMAC.
    pub fn canonical_string(&self) -> String {
        self.payload
            .iter()
            .filter(|(k, _)| k.as_str() != "sign")
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Compute the hex-uppercase signature keyed by the session token.
    pub fn sign(&self) -> String {
        let canonical = self.canonical_string();
        let digest = hmac_sha256_hex(&self.key, canonical.as_bytes());
        trace!(%canonical, %digest, "signed envelope payload");
        digest
    }

    /// Recompute and compare against a presented signature.
    pub fn verify(&self, sign: &str) -> bool {
        digests_match(&self.sign(), sign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<(&'static str, &'static str)> {
        vec![
            ("access_id", "acc-1"),
            ("t", "1700000000000"),
            ("sign_method", SIGN_METHOD),
            ("nonce", "0123456789abcdef0123456789abcdef"),
        ]
    }

    #[test]
    fn rest_canonical_string_layout() {
        let signer = RestSigner::new("secret")
            .with_headers(headers())
            .with_query([("b", "2"), ("a", "1")])
            .with_payload(*b"body")
            .with_path("/v1/client/registration");

        assert_eq!(
            signer.canonical_string(),
            "acc-1\n1700000000000\nHMAC-SHA256\n0123456789abcdef0123456789abcdef\n\
             \na=1&b=2\nbody\n/v1/client/registration"
        );
    }

    #[test]
    fn rest_canonical_string_without_query_or_payload() {
        let signer = RestSigner::new("secret")
            .with_headers(headers())
            .with_path("/v1/client/registration");

        assert_eq!(
            signer.canonical_string(),
            "acc-1\n1700000000000\nHMAC-SHA256\n0123456789abcdef0123456789abcdef\n\
             \n\n\n/v1/client/registration"
        );
    }

    #[test]
    fn rest_signature_headers_are_listed_in_order() {
        let mut hdrs = headers();
        hdrs.push(("signature_headers", "X-Second, X-First"));
        hdrs.push(("X-First", "one"));
        hdrs.push(("X-Second", "two"));

        let signer = RestSigner::new("secret").with_headers(hdrs).with_path("/p");
        let canonical = signer.canonical_string();

        let second = canonical.find("x-second:two").unwrap();
        let first = canonical.find("x-first:one").unwrap();
        assert!(second < first, "listed order must be preserved");
    }

    #[test]
    fn rest_multi_valued_query_keys_are_joined() {
        let signer = RestSigner::new("k")
            .with_headers(headers())
            .with_query([("tag", "x"), ("tag", "y")])
            .with_path("/p");
        assert!(signer.canonical_string().contains("tag=x,y"));
    }

    #[test]
    fn rest_sign_is_hex_uppercase() {
        let sign = RestSigner::new("secret")
            .with_headers(headers())
            .with_path("/p")
            .sign();
        assert_eq!(sign.len(), 64);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn rest_roundtrip_and_tamper() {
        let signer = RestSigner::new("secret")
            .with_headers(headers())
            .with_query([("client_id", "c-1")])
            .with_path("/ws/mcp");
        let sign = signer.sign();

        assert!(signer.verify(&sign));
        assert!(signer.verify(&sign.to_ascii_lowercase()));
        assert!(!RestSigner::new("other-key")
            .with_headers(headers())
            .with_query([("client_id", "c-1")])
            .with_path("/ws/mcp")
            .verify(&sign));
    }

    fn envelope_payload() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("request_id".into(), "r-1".into()),
            ("endpoint".into(), "ep".into()),
            ("version".into(), "1.0".into()),
            ("method".into(), "tools/list".into()),
            ("ts".into(), "1700000000000".into()),
            ("request".into(), "{}".into()),
        ])
    }

    #[test]
    fn envelope_canonical_string_is_sorted_without_sign() {
        let mut payload = envelope_payload();
        payload.insert("sign".into(), "SHOULD-NOT-APPEAR".into());

        let canonical = EnvelopeSigner::new(payload, "token").canonical_string();
        assert_eq!(
            canonical,
            "endpoint:ep\nmethod:tools/list\nrequest:{}\nrequest_id:r-1\n\
             ts:1700000000000\nversion:1.0"
        );
        assert!(!canonical.contains("sign"));
        assert!(!canonical.ends_with('\n'));
    }

    #[test]
    fn envelope_roundtrip_tamper_and_key_mismatch() {
        let signer = EnvelopeSigner::new(envelope_payload(), "token");
        let sign = signer.sign();
        assert!(signer.verify(&sign));
        assert!(signer.verify(&sign.to_ascii_lowercase()));

        let mut tampered = envelope_payload();
        tampered.insert("request".into(), "{\"evil\":true}".into());
        assert!(!EnvelopeSigner::new(tampered, "token").verify(&sign));

        assert!(!EnvelopeSigner::new(envelope_payload(), "other").verify(&sign));
    }
}
