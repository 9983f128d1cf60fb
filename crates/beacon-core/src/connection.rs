//! One WebSocket connection: ready-state tracking, the inbound read task
//! with fragment reassembly, and the cloneable [`ConnectionHandle`] used by
//! the embedding application to send frames back.
//!
//! Per-connection state (decoder buffers, fragment accumulator) is owned
//! exclusively by the connection's read task — it is never shared, so no
//! lock guards it.  Only the write half of the socket is shared: `send`,
//! ping replies, and registry broadcasts all funnel through one async mutex
//! so their writes serialize.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::decoder::FrameDecoder;
use crate::protocol::frame::{
    Frame, Opcode, ProtocolError, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR,
};
use crate::registry::WsEvent;

/// Unique identifier for one connection, assigned at handshake time.
pub type ConnectionId = Uuid;

/// Connection lifecycle state.
///
/// A connection starts CONNECTING, becomes OPEN only once the handshake
/// response has been written, CLOSING when a close frame has been sent or
/// received, and CLOSED when the underlying socket is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A fully reassembled inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message, validated as UTF-8.
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
}

/// Errors that end a connection's read task.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer violated the framing protocol; a close frame is attempted
    /// and the socket is torn down.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The socket itself failed; the connection is torn down without a
    /// close-frame attempt.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// No bytes arrived within the configured idle window.
    #[error("idle timeout exceeded")]
    IdleTimeout,
}

/// Errors returned by [`ConnectionHandle::send`] and friends.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection is not OPEN; nothing was written.
    #[error("connection is not open")]
    NotOpen,

    /// The socket write failed.
    #[error("socket write failed: {0}")]
    Io(#[from] std::io::Error),
}

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Cloneable handle to one live connection.
///
/// The registry hands one of these to the embedding application via
/// [`WsEvent::Connected`]; the live-reload broadcaster keeps no state beyond
/// these handles.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    writer: SharedWriter,
    state: Arc<AtomicU8>,
    close_sent: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: ConnectionId, writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            id,
            writer: Arc::new(Mutex::new(writer)),
            state: Arc::new(AtomicU8::new(ReadyState::Connecting as u8)),
            close_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The connection's registry id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_ready_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Sends a text message as a single unmasked frame (FIN = 1).
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotOpen`] unless the connection is OPEN, or the
    /// underlying write error.
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        self.send_frame(Frame::text(text)).await
    }

    /// Sends a binary message as a single unmasked frame (FIN = 1).
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionHandle::send`].
    pub async fn send_binary(&self, payload: Vec<u8>) -> Result<(), SendError> {
        self.send_frame(Frame::binary(payload)).await
    }

    /// Starts the close handshake: sends a close frame and moves to CLOSING.
    ///
    /// The CLOSED transition happens when the socket itself closes, driven
    /// by the read task — not by this call.  Calling close on a connection
    /// that is not OPEN is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the write error if the close frame could not be sent.
    pub async fn close(&self) -> Result<(), SendError> {
        if self.ready_state() != ReadyState::Open {
            return Ok(());
        }
        self.send_close(CLOSE_NORMAL).await?;
        self.set_ready_state(ReadyState::Closing);
        Ok(())
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), SendError> {
        if self.ready_state() != ReadyState::Open {
            return Err(SendError::NotOpen);
        }
        self.write_frame(&frame).await?;
        Ok(())
    }

    /// Encodes and writes a frame: header and payload as one contiguous
    /// buffer, one `write_all`.
    pub(crate) async fn write_frame(&self, frame: &Frame) -> std::io::Result<()> {
        let bytes = frame.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await
    }

    /// Writes a close frame at most once per connection, regardless of which
    /// side initiated the close.
    pub(crate) async fn send_close(&self, code: u16) -> std::io::Result<()> {
        if self.close_sent.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        self.write_frame(&Frame::close(code)).await
    }

    pub(crate) async fn shutdown_socket(&self) -> std::io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// Whether frame dispatch should keep the read loop alive.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Closed,
}

/// The inbound side of one connection, owned by its read task.
pub(crate) struct Connection {
    handle: ConnectionHandle,
    decoder: FrameDecoder,
    fragments: Vec<Vec<u8>>,
    fragment_opcode: Option<Opcode>,
    events: mpsc::Sender<WsEvent>,
    idle_timeout: Option<Duration>,
}

impl Connection {
    /// Creates the read side for an OPEN connection.  `initial` holds any
    /// bytes the client transmitted together with its upgrade request; they
    /// precede everything read from the socket.
    pub(crate) fn new(
        handle: ConnectionHandle,
        events: mpsc::Sender<WsEvent>,
        initial: Vec<u8>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&initial);
        Self {
            handle,
            decoder,
            fragments: Vec::new(),
            fragment_opcode: None,
            events,
            idle_timeout,
        }
    }

    /// Runs the read loop to completion and logs the outcome.
    ///
    /// The outer/inner split keeps `?` available inside [`Connection::read_loop`]
    /// while every exit path is logged and a close frame is attempted where
    /// the error taxonomy calls for one.
    pub(crate) async fn run<R>(mut self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let id = self.handle.id();
        match self.read_loop(&mut reader).await {
            Ok(()) => debug!("connection {id}: closed"),
            Err(ConnectionError::Protocol(e)) => {
                warn!("connection {id}: protocol violation: {e}");
                let _ = self.handle.send_close(CLOSE_PROTOCOL_ERROR).await;
            }
            Err(ConnectionError::IdleTimeout) => {
                debug!("connection {id}: idle timeout exceeded");
                let _ = self.handle.send_close(CLOSE_NORMAL).await;
            }
            Err(ConnectionError::Transport(e)) => {
                // No close-frame attempt: the transport is already gone.
                debug!("connection {id}: transport error: {e}");
            }
        }
    }

    async fn read_loop<R>(&mut self, reader: &mut R) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        // The client may have transmitted frames together with its upgrade
        // request; drain those before the first socket read.
        if self.drain_frames().await? == Flow::Closed {
            return Ok(());
        }

        let mut read_buf = vec![0u8; 4096];
        loop {
            let n = self.read_chunk(reader, &mut read_buf).await?;
            if n == 0 {
                return Ok(()); // EOF: the peer closed the socket.
            }
            self.decoder.feed(&read_buf[..n]);
            if self.drain_frames().await? == Flow::Closed {
                return Ok(());
            }
        }
    }

    async fn read_chunk<R>(
        &self,
        reader: &mut R,
        buf: &mut [u8],
    ) -> Result<usize, ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        match self.idle_timeout {
            Some(limit) => timeout(limit, reader.read(buf))
                .await
                .map_err(|_| ConnectionError::IdleTimeout)?
                .map_err(ConnectionError::Transport),
            None => reader.read(buf).await.map_err(ConnectionError::Transport),
        }
    }

    /// Decodes every complete frame currently buffered, then suspends.
    async fn drain_frames(&mut self) -> Result<Flow, ConnectionError> {
        while let Some(frame) = self.decoder.next_frame()? {
            if self.dispatch(frame).await? == Flow::Closed {
                return Ok(Flow::Closed);
            }
        }
        Ok(Flow::Continue)
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Flow, ConnectionError> {
        // After a close frame has been sent (CLOSING), inbound data is no
        // longer delivered; only the peer's close frame still matters.
        if self.handle.ready_state() != ReadyState::Open && frame.opcode != Opcode::Close {
            return Ok(Flow::Continue);
        }

        match frame.opcode {
            Opcode::Close => {
                let _ = self.handle.send_close(CLOSE_NORMAL).await;
                self.handle.set_ready_state(ReadyState::Closing);
                Ok(Flow::Closed)
            }
            Opcode::Ping => {
                self.handle
                    .write_frame(&Frame::pong(frame.payload))
                    .await
                    .map_err(ConnectionError::Transport)?;
                Ok(Flow::Continue)
            }
            Opcode::Pong => {
                let _ = self
                    .events
                    .send(WsEvent::Pong {
                        connection_id: self.handle.id(),
                        payload: frame.payload,
                    })
                    .await;
                Ok(Flow::Continue)
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => self.assemble(frame).await,
        }
    }

    /// Accumulates data-frame payloads until FIN, then delivers the
    /// assembled message exactly once.
    async fn assemble(&mut self, frame: Frame) -> Result<Flow, ConnectionError> {
        // The initiating frame's opcode decides text vs binary; continuation
        // frames never change it.
        let opcode = *self.fragment_opcode.get_or_insert(frame.opcode);
        self.fragments.push(frame.payload);

        if !frame.fin {
            return Ok(Flow::Continue);
        }

        self.fragment_opcode = None;
        let assembled: Vec<u8> = self.fragments.drain(..).flatten().collect();
        let message = match opcode {
            Opcode::Text => Message::Text(
                String::from_utf8(assembled)
                    .map_err(|_| ConnectionError::Protocol(ProtocolError::InvalidUtf8))?,
            ),
            _ => Message::Binary(assembled),
        };

        let _ = self
            .events
            .send(WsEvent::Message {
                connection_id: self.handle.id(),
                message,
            })
            .await;
        Ok(Flow::Continue)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const KEY: [u8; 4] = [9, 8, 7, 6];

    fn open_handle(writer: Box<dyn AsyncWrite + Send + Unpin>) -> ConnectionHandle {
        let handle = ConnectionHandle::new(Uuid::new_v4(), writer);
        handle.set_ready_state(ReadyState::Open);
        handle
    }

    #[tokio::test]
    async fn test_send_refused_before_open() {
        let (local, _remote) = duplex(256);
        let handle = ConnectionHandle::new(Uuid::new_v4(), Box::new(local));

        assert_eq!(handle.ready_state(), ReadyState::Connecting);
        assert!(matches!(handle.send("x").await, Err(SendError::NotOpen)));
    }

    #[tokio::test]
    async fn test_send_writes_single_unmasked_text_frame() {
        let (local, mut remote) = duplex(256);
        let handle = open_handle(Box::new(local));

        handle.send("reload").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], Frame::text("reload").encode().as_slice());
        assert_eq!(buf[1] & 0x80, 0, "server frames are never masked");
        assert_eq!(buf[0] & 0x80, 0x80, "server frames are never fragmented");
    }

    #[tokio::test]
    async fn test_close_sends_close_frame_and_enters_closing() {
        let (local, mut remote) = duplex(256);
        let handle = open_handle(Box::new(local));

        handle.close().await.unwrap();
        assert_eq!(handle.ready_state(), ReadyState::Closing);

        let mut buf = vec![0u8; 16];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], Frame::close(CLOSE_NORMAL).encode().as_slice());

        // A second close is a no-op and must not write another frame.
        handle.close().await.unwrap();
        handle.send_close(CLOSE_NORMAL).await.unwrap();
        drop(handle);
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "close frame must be sent at most once");
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_matching_pong() {
        let (server_side, mut client_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let handle = open_handle(Box::new(write_half));
        let (tx, _rx) = mpsc::channel(8);

        let conn = Connection::new(handle, tx, Vec::new(), None);
        let task = tokio::spawn(conn.run(read_half));

        client_side
            .write_all(&Frame::ping(b"stamp".to_vec()).masked(KEY).encode())
            .await
            .unwrap();

        let mut buf = vec![0u8; 16];
        let n = client_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], Frame::pong(b"stamp".to_vec()).encode().as_slice());

        drop(client_side);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_fragmented_message_is_delivered_once_assembled() {
        let (server_side, mut client_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let handle = open_handle(Box::new(write_half));
        let id = handle.id();
        let (tx, mut rx) = mpsc::channel(8);

        let conn = Connection::new(handle, tx, Vec::new(), None);
        let task = tokio::spawn(conn.run(read_half));

        let mut first = Frame::text("ab").masked(KEY);
        first.fin = false;
        let middle = Frame {
            fin: false,
            opcode: Opcode::Continuation,
            mask_key: Some(KEY),
            payload: b"cd".to_vec(),
        };
        let last = Frame {
            fin: true,
            opcode: Opcode::Continuation,
            mask_key: Some(KEY),
            payload: b"ef".to_vec(),
        };

        // Deliver the three frames as three separate writes.
        client_side.write_all(&first.encode()).await.unwrap();
        client_side.write_all(&middle.encode()).await.unwrap();
        client_side.write_all(&last.encode()).await.unwrap();

        let event = rx.recv().await.unwrap();
        match event {
            WsEvent::Message {
                connection_id,
                message,
            } => {
                assert_eq!(connection_id, id);
                assert_eq!(message, Message::Text("abcdef".to_string()));
            }
            other => panic!("expected a message event, got {other:?}"),
        }

        drop(client_side);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_frame_is_echoed_and_ends_the_read_task() {
        let (server_side, mut client_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let handle = open_handle(Box::new(write_half));
        let (tx, _rx) = mpsc::channel(8);

        let conn = Connection::new(handle.clone(), tx, Vec::new(), None);
        let task = tokio::spawn(conn.run(read_half));

        client_side
            .write_all(&Frame::close(CLOSE_NORMAL).masked(KEY).encode())
            .await
            .unwrap();

        let mut buf = vec![0u8; 16];
        let n = client_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], Frame::close(CLOSE_NORMAL).encode().as_slice());

        task.await.unwrap();
        assert_eq!(handle.ready_state(), ReadyState::Closing);
    }

    #[tokio::test]
    async fn test_protocol_violation_triggers_close_frame_and_no_message() {
        let (server_side, mut client_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let handle = open_handle(Box::new(write_half));
        let (tx, mut rx) = mpsc::channel(8);

        let conn = Connection::new(handle, tx, Vec::new(), None);
        let task = tokio::spawn(conn.run(read_half));

        // A control frame with FIN = 0 is a violation straight from the
        // header; it must never surface as a message.
        let mut wire = Frame::ping(b"p".to_vec()).masked(KEY).encode();
        wire[0] &= 0x7F;
        client_side.write_all(&wire).await.unwrap();

        let mut buf = vec![0u8; 16];
        let n = client_side.read(&mut buf).await.unwrap();
        assert_eq!(
            &buf[..n],
            Frame::close(CLOSE_PROTOCOL_ERROR).encode().as_slice()
        );

        task.await.unwrap();
        assert!(rx.try_recv().is_err(), "violations must not reach dispatch");
    }

    #[tokio::test]
    async fn test_initial_bytes_from_upgrade_are_decoded_first() {
        let (server_side, client_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let handle = open_handle(Box::new(write_half));
        let (tx, mut rx) = mpsc::channel(8);

        // The frame arrived in the same TCP segment as the upgrade request.
        let initial = Frame::text("early").masked(KEY).encode();
        let conn = Connection::new(handle, tx, initial, None);
        let task = tokio::spawn(conn.run(read_half));

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            WsEvent::Message {
                message: Message::Text(ref text),
                ..
            } if text == "early"
        ));

        drop(client_side);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_the_connection() {
        let (server_side, mut client_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let handle = open_handle(Box::new(write_half));
        let (tx, _rx) = mpsc::channel(8);

        let conn = Connection::new(handle, tx, Vec::new(), Some(Duration::from_millis(20)));
        let task = tokio::spawn(conn.run(read_half));

        // Send nothing; the read task must give up on its own.
        let mut buf = vec![0u8; 16];
        let n = client_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], Frame::close(CLOSE_NORMAL).encode().as_slice());
        task.await.unwrap();
    }
}
