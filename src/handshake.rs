//! WebSocket upgrade handshake
//!
//! Validates an already-parsed HTTP/1.1 upgrade request and produces the
//! raw 101 or 400 response bytes. The accept token is
//! Base64(SHA-1(key + GUID)) over the raw key bytes, with no normalization.

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use http::{header, Request};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::WS_GUID;

/// Handshake versions this server accepts (RFC 6455 plus drafts 7 and 8)
const SUPPORTED_VERSIONS: [u32; 3] = [7, 8, 13];

/// Validate a WebSocket upgrade request.
///
/// Checks, in order: a `Connection` header token equal to `upgrade`, an
/// `Upgrade` header equal to `websocket`, a supported
/// `Sec-WebSocket-Version`, and a non-empty `Sec-WebSocket-Key`. Returns
/// the key on success.
pub fn validate_upgrade<B>(request: &Request<B>) -> Result<&str> {
    let connection_upgrade = request
        .headers()
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !connection_upgrade {
        return Err(Error::HandshakeFailed("missing Connection: Upgrade"));
    }

    let upgrade_websocket = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    if !upgrade_websocket {
        return Err(Error::HandshakeFailed("missing Upgrade: websocket"));
    }

    let version = request
        .headers()
        .get(header::SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok());
    match version {
        Some(v) if SUPPORTED_VERSIONS.contains(&v) => {}
        _ => return Err(Error::HandshakeFailed("unsupported WebSocket version")),
    }

    let key = request
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Key"))?;
    if key.is_empty() {
        return Err(Error::HandshakeFailed("missing Sec-WebSocket-Key"));
    }

    Ok(key)
}

/// Generate the Sec-WebSocket-Accept token
///
/// This computes: Base64(SHA-1(key + GUID))
#[inline]
pub fn generate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Build the 101 Switching Protocols response
pub fn build_accept_response(accept_key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(160);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.freeze()
}

/// Build the 400 Bad Request response sent when the upgrade is refused
pub fn build_reject_response() -> Bytes {
    Bytes::from_static(
        b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(version: &str, key: Option<&str>) -> Request<()> {
        let mut builder = Request::builder()
            .method("GET")
            .uri("/chat")
            .header("Host", "server.example.com")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", version);
        if let Some(key) = key {
            builder = builder.header("Sec-WebSocket-Key", key);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_generate_accept_key() {
        // Test vector from RFC 6455
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = generate_accept_key(key);
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_validate_ok() {
        let req = upgrade_request("13", Some("dGhlIHNhbXBsZSBub25jZQ=="));
        assert_eq!(validate_upgrade(&req).unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn test_validate_draft_versions() {
        for version in ["7", "8", "13"] {
            let req = upgrade_request(version, Some("a2V5"));
            assert!(validate_upgrade(&req).is_ok(), "version {}", version);
        }
    }

    #[test]
    fn test_validate_unsupported_version() {
        for version in ["12", "14", "0", "junk"] {
            let req = upgrade_request(version, Some("a2V5"));
            assert!(matches!(
                validate_upgrade(&req),
                Err(Error::HandshakeFailed("unsupported WebSocket version"))
            ));
        }
    }

    #[test]
    fn test_validate_missing_connection_upgrade() {
        let req = Request::builder()
            .header("Connection", "keep-alive")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "a2V5")
            .body(())
            .unwrap();
        assert!(matches!(
            validate_upgrade(&req),
            Err(Error::HandshakeFailed("missing Connection: Upgrade"))
        ));
    }

    #[test]
    fn test_validate_connection_token_list() {
        // Token appears in a list and with different case
        let req = Request::builder()
            .header("Connection", "keep-alive, UPGRADE")
            .header("Upgrade", "WebSocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "a2V5")
            .body(())
            .unwrap();
        assert!(validate_upgrade(&req).is_ok());
    }

    #[test]
    fn test_validate_missing_upgrade_header() {
        let req = Request::builder()
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "a2V5")
            .body(())
            .unwrap();
        assert!(matches!(
            validate_upgrade(&req),
            Err(Error::HandshakeFailed("missing Upgrade: websocket"))
        ));
    }

    #[test]
    fn test_validate_missing_or_empty_key() {
        let req = upgrade_request("13", None);
        assert!(matches!(
            validate_upgrade(&req),
            Err(Error::HandshakeFailed("missing Sec-WebSocket-Key"))
        ));

        let req = upgrade_request("13", Some(""));
        assert!(matches!(
            validate_upgrade(&req),
            Err(Error::HandshakeFailed("missing Sec-WebSocket-Key"))
        ));
    }

    #[test]
    fn test_build_accept_response() {
        let response = build_accept_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_build_reject_response() {
        let response = build_reject_response();
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
