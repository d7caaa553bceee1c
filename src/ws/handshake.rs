//! Server side of the WebSocket opening handshake (RFC 6455 Section 4.2).
//!
//! ```http
//! GET /?room=lobby HTTP/1.1
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};
use thiserror::Error;
use url::form_urlencoded;

use crate::http::request::Request;
use crate::http::response;
use crate::rooms::RoomId;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WS_VERSION: &str = "13";

/// Why an upgrade request was refused. Every variant is answered with
/// `400 Bad Request` and the transport is closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("upgrade to {0:?} is not supported")]
    NotWebSocket(String),

    #[error("upgrade requires GET, got {0}")]
    Method(String),

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("Sec-WebSocket-Key is not a base64 encoded 16-byte nonce")]
    InvalidKey,

    #[error("unsupported WebSocket version {0:?}")]
    UnsupportedVersion(String),
}

impl HandshakeError {
    /// Raw HTTP response for this rejection.
    pub fn response(&self) -> String {
        match self {
            HandshakeError::UnsupportedVersion(_) => {
                response::bad_request(&[("Sec-WebSocket-Version", WS_VERSION)])
            }
            _ => response::bad_request(&[]),
        }
    }
}

/// An accepted upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    pub accept_key: String,
    pub room: RoomId,
}

impl Upgrade {
    /// The `101 Switching Protocols` response completing the handshake.
    pub fn response(&self) -> String {
        response::switching_protocols(&self.accept_key)
    }
}

/// Compute `Sec-WebSocket-Accept`: base64 of the SHA-1 of key + GUID.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Requests without an `Upgrade` header are plain HTTP.
pub fn is_upgrade_request(request: &Request) -> bool {
    request.header("upgrade").is_some()
}

/// Resolve the room from a query string. A missing or empty `room`
/// parameter selects the default room.
pub fn room_from_query(query: Option<&str>) -> RoomId {
    query
        .and_then(|query| {
            form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "room")
                .map(|(_, value)| RoomId::new(value.into_owned()))
        })
        .unwrap_or_default()
}

/// Validate an upgrade request and compute the response values.
pub fn accept(request: &Request) -> Result<Upgrade, HandshakeError> {
    let upgrade = request.header("upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::NotWebSocket(upgrade.to_string()));
    }
    if request.method != "GET" {
        return Err(HandshakeError::Method(request.method.clone()));
    }

    let key = request.header("sec-websocket-key").ok_or(HandshakeError::MissingKey)?;
    match STANDARD.decode(key) {
        Ok(nonce) if nonce.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey),
    }

    if let Some(version) = request.header("sec-websocket-version") {
        if version != WS_VERSION {
            return Err(HandshakeError::UnsupportedVersion(version.to_string()));
        }
    }

    Ok(Upgrade {
        accept_key: compute_accept_key(key),
        room: room_from_query(request.query()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_head;

    fn request(head: &str) -> Request {
        parse_head(head.as_bytes()).unwrap().unwrap().0
    }

    fn upgrade_head(target: &str, upgrade: &str, extra: &str) -> String {
        format!(
            "GET {target} HTTP/1.1\r\nHost: localhost\r\nUpgrade: {upgrade}\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n{extra}\r\n"
        )
    }

    #[test]
    fn rfc_accept_key() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accepts_case_insensitive_upgrade() {
        let upgrade = accept(&request(&upgrade_head("/?room=lobby", "WebSocket", ""))).unwrap();
        assert_eq!(upgrade.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(upgrade.room, RoomId::from("lobby"));
        assert!(upgrade.response().contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn room_defaults() {
        assert_eq!(room_from_query(None), RoomId::default());
        assert_eq!(room_from_query(Some("")), RoomId::default());
        assert_eq!(room_from_query(Some("room=")), RoomId::default());
        assert_eq!(room_from_query(Some("other=1")), RoomId::default());
        assert_eq!(room_from_query(Some("x=1&room=a%20b")), RoomId::from("a b"));
    }

    #[test]
    fn rejects_other_upgrades() {
        let err = accept(&request(&upgrade_head("/", "h2c", ""))).unwrap_err();
        assert_eq!(err, HandshakeError::NotWebSocket("h2c".into()));
        assert!(err.response().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn rejects_missing_or_bad_key() {
        let head = "GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert_eq!(accept(&request(head)), Err(HandshakeError::MissingKey));

        let head = "GET / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: short\r\n\r\n";
        assert_eq!(accept(&request(head)), Err(HandshakeError::InvalidKey));
    }

    #[test]
    fn rejects_unsupported_version() {
        let head = upgrade_head("/", "websocket", "Sec-WebSocket-Version: 8\r\n");
        let err = accept(&request(&head)).unwrap_err();
        assert_eq!(err, HandshakeError::UnsupportedVersion("8".into()));
        assert!(err.response().contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[test]
    fn plain_requests_are_not_upgrades() {
        assert!(!is_upgrade_request(&request("GET / HTTP/1.1\r\nHost: x\r\n\r\n")));
        assert!(is_upgrade_request(&request(&upgrade_head("/", "websocket", ""))));
    }
}
