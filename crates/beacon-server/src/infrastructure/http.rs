//! Minimal HTTP/1.1 plumbing: request-head parsing and response writing.
//!
//! The server only needs enough HTTP to route three kinds of requests —
//! WebSocket upgrades, custom endpoints, and static files — so this module
//! stays deliberately small: no chunked bodies, no trailers, no multi-line
//! header folding.
//!
//! TCP is a stream, so a single `read()` may hold half a request line or a
//! complete head plus the first WebSocket frames.  [`read_request_head`]
//! accumulates bytes until the blank line and returns whatever followed it
//! untouched, for the upgrade path to hand to the frame decoder.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a request head; anything larger is rejected.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Upper bound on a request body read for endpoint dispatch.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Errors raised while reading or parsing a request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request line was not `METHOD SP TARGET SP VERSION`.
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// A header line had no colon.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// The head did not fit in [`MAX_HEAD_BYTES`].
    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,

    /// The head contained bytes that are not valid UTF-8.
    #[error("request head is not valid UTF-8")]
    HeadNotUtf8,

    /// The peer closed the socket before a complete head arrived.
    #[error("connection closed before a complete request head arrived")]
    UnexpectedEof,

    /// `Content-Length` was present but not a number.
    #[error("invalid Content-Length header")]
    InvalidContentLength,

    /// The declared body exceeds [`MAX_BODY_BYTES`].
    #[error("request body exceeds {MAX_BODY_BYTES} bytes")]
    BodyTooLarge,

    /// The socket failed mid-request.
    #[error("I/O error reading request: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed request head: request line plus headers, no body.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method, as sent (e.g. `GET`).
    pub method: String,
    /// Request target, as sent (path plus optional query).
    pub target: String,
    /// Protocol version token (e.g. `HTTP/1.1`).
    pub version: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses a head from its textual form (request line + header lines).
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::MalformedRequestLine`] or
    /// [`HttpError::MalformedHeader`].
    pub fn parse(raw: &str) -> Result<Self, HttpError> {
        let mut lines = raw.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ');
        let (Some(method), Some(target), Some(version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpError::MalformedRequestLine(request_line.to_string()));
        };
        if method.is_empty() || target.is_empty() || version.is_empty() || parts.next().is_some() {
            return Err(HttpError::MalformedRequestLine(request_line.to_string()));
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(HttpError::MalformedHeader(line.to_string()));
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request path: the target with any query or fragment stripped.
    pub fn path(&self) -> &str {
        let end = self
            .target
            .find(['?', '#'])
            .unwrap_or(self.target.len());
        &self.target[..end]
    }

    /// True when the client asked to drop the connection after this
    /// exchange (explicit `Connection: close`, or HTTP/1.0 default).
    pub fn wants_close(&self) -> bool {
        match self.header("connection") {
            Some(value) => value.eq_ignore_ascii_case("close"),
            None => self.version == "HTTP/1.0",
        }
    }
}

/// Reads one request head from `reader`.
///
/// Returns the parsed head plus any bytes that arrived after the blank
/// line: the start of the body, or — on an upgrade — the client's first
/// WebSocket frames.
///
/// # Errors
///
/// Returns [`HttpError`] on EOF, oversized heads, or malformed syntax.
pub async fn read_request_head<R>(reader: &mut R) -> Result<(RequestHead, Vec<u8>), HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut tmp = [0u8; 1024];

    loop {
        if let Some(end) = find_head_end(&buf) {
            let head_text =
                std::str::from_utf8(&buf[..end - 4]).map_err(|_| HttpError::HeadNotUtf8)?;
            let head = RequestHead::parse(head_text)?;
            return Ok((head, buf[end..].to_vec()));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(HttpError::HeadTooLarge);
        }

        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            return Err(HttpError::UnexpectedEof);
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

/// Position just past the `\r\n\r\n` terminator, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Reads the request body according to `Content-Length`, starting from the
/// bytes already pulled off the socket with the head.
///
/// # Errors
///
/// Returns [`HttpError`] on a bad length header, an oversized body, or a
/// short read.
pub async fn read_body<R>(
    reader: &mut R,
    head: &RequestHead,
    leftover: Vec<u8>,
) -> Result<Vec<u8>, HttpError>
where
    R: AsyncRead + Unpin,
{
    let declared = match head.header("content-length") {
        None => return Ok(Vec::new()),
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|_| HttpError::InvalidContentLength)?,
    };
    if declared > MAX_BODY_BYTES {
        return Err(HttpError::BodyTooLarge);
    }

    let mut body = leftover;
    if body.len() > declared {
        body.truncate(declared);
    }

    let mut tmp = [0u8; 4096];
    while body.len() < declared {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            return Err(HttpError::UnexpectedEof);
        }
        let take = n.min(declared - body.len());
        body.extend_from_slice(&tmp[..take]);
    }
    Ok(body)
}

/// An HTTP response ready to serialize.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Response headers in write order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl Response {
    /// An empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sets the body and its `Content-Type`.
    pub fn with_body(self, content_type: &str, body: Vec<u8>) -> Self {
        let mut response = self.with_header("Content-Type", content_type);
        response.body = body;
        response
    }

    /// A plain-text response.
    pub fn text(status: u16, message: &str) -> Self {
        Self::new(status).with_body("text/plain", message.as_bytes().to_vec())
    }

    /// 404 with the classic dev-server error text.
    pub fn not_found(what: &str) -> Self {
        Self::text(404, &format!("ERROR 404: {what} not found."))
    }

    /// 500 carrying the error message.
    pub fn server_error(message: &str) -> Self {
        Self::text(500, message)
    }

    /// 400 carrying the parse failure.
    pub fn bad_request(message: &str) -> Self {
        Self::text(400, message)
    }
}

/// Standard reason phrase for the status codes this server emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Serializes and writes a response, adding `Content-Length`.
///
/// # Errors
///
/// Returns the underlying write error.
pub async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    );
    for (name, value) in &response.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&response.body).await?;
    writer.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
