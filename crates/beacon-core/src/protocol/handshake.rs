//! HTTP upgrade handshake: accept-key derivation and the 101 response.
//!
//! A client proves it speaks WebSocket by sending a random 16-byte nonce,
//! base64-encoded, in `Sec-WebSocket-Key`.  The server concatenates the
//! nonce with a fixed GUID, hashes the result with SHA-1, and returns the
//! base64 digest in `Sec-WebSocket-Accept`.  Browsers verify the echo before
//! exposing the socket to page scripts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// The fixed GUID appended to the client nonce (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Number of raw bytes a valid nonce decodes to.
pub const NONCE_LEN: usize = 16;

/// Errors terminal before any connection exists: the socket is destroyed and
/// nothing is registered.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The upgrade request carried no `Sec-WebSocket-Key` header.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    /// The key was not valid base64.
    #[error("Sec-WebSocket-Key is not valid base64")]
    KeyNotBase64,

    /// The key decoded to the wrong number of bytes.
    #[error("Sec-WebSocket-Key must decode to {NONCE_LEN} bytes, got {0}")]
    KeyWrongLength(usize),

    /// Writing the 101 response failed before the connection opened.
    #[error("failed to write handshake response: {0}")]
    Io(#[from] std::io::Error),
}

/// Returns true when an `Upgrade` header value names the websocket protocol.
///
/// The token comparison is case-insensitive; everything else (h2c, TLS/1.0,
/// absent header) is left to the HTTP layer to answer normally.
pub fn is_websocket_upgrade(upgrade_header: &str) -> bool {
    upgrade_header.trim().eq_ignore_ascii_case("websocket")
}

/// Validates that `nonce` is base64 for exactly [`NONCE_LEN`] raw bytes.
///
/// # Errors
///
/// Returns [`HandshakeError::KeyNotBase64`] or
/// [`HandshakeError::KeyWrongLength`].
pub fn validate_nonce(nonce: &str) -> Result<(), HandshakeError> {
    let decoded = BASE64
        .decode(nonce)
        .map_err(|_| HandshakeError::KeyNotBase64)?;
    if decoded.len() != NONCE_LEN {
        return Err(HandshakeError::KeyWrongLength(decoded.len()));
    }
    Ok(())
}

/// Derives the `Sec-WebSocket-Accept` value for a client nonce:
/// `base64(SHA1(nonce + GUID))`.
pub fn accept_key(nonce: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Builds the complete 101 response for a validated nonce: status line and
/// headers CRLF-terminated, ending with a blank line.  Exactly one such
/// response is written per connection, before any frame is processed.
///
/// # Errors
///
/// Returns a key-validation error; nothing is written for an invalid nonce.
pub fn response(nonce: &str) -> Result<String, HandshakeError> {
    validate_nonce(nonce)?;
    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(nonce)
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
