//! The connection registry: upgrade entry point, active-session set, and
//! the event stream consumed by the embedding application.
//!
//! The registry holds the only long-lived reference to each connection.  An
//! entry appears when a handshake succeeds and disappears when the socket
//! closes — whatever the reason: a normal close handshake, an abrupt
//! transport error, or a protocol violation.  Insert and remove race across
//! connection tasks on the multi-threaded runtime, so the set lives behind
//! an async mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionHandle, ConnectionId, Message, ReadyState};
use crate::protocol::handshake::{self, HandshakeError};

/// Capacity of the registry's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events emitted by the registry to the embedding application.
///
/// An explicit event enum over a channel replaces the source material's
/// overridable no-op methods: the consumer is handed exactly one stream,
/// fixed at construction time.
#[derive(Debug)]
pub enum WsEvent {
    /// A handshake completed; the handle can send frames immediately.
    Connected(ConnectionHandle),
    /// A complete (possibly reassembled) message arrived.
    Message {
        connection_id: ConnectionId,
        message: Message,
    },
    /// The peer answered a ping, or sent an unsolicited pong.
    Pong {
        connection_id: ConnectionId,
        payload: Vec<u8>,
    },
    /// The socket closed and the connection was dropped from the registry.
    Disconnected { connection_id: ConnectionId },
}

/// Owner of every active WebSocket session.
///
/// Constructed once per server; the embedding HTTP layer calls
/// [`ConnectionRegistry::handle_upgrade`] for each request whose `Upgrade`
/// header names the websocket token, and the live-reload broadcaster calls
/// [`ConnectionRegistry::broadcast`] on every watched-file change.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    events: mpsc::Sender<WsEvent>,
    idle_timeout: Option<Duration>,
}

impl ConnectionRegistry {
    /// Creates a registry and the event receiver the application consumes.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<WsEvent>) {
        Self::with_idle_timeout(None)
    }

    /// Creates a registry whose connections are closed after `idle_timeout`
    /// without inbound bytes.  `None` disables the timeout; a live-reload
    /// browser tab may legitimately sit silent for hours.
    pub fn with_idle_timeout(
        idle_timeout: Option<Duration>,
    ) -> (Arc<Self>, mpsc::Receiver<WsEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            events: tx,
            idle_timeout,
        });
        (registry, rx)
    }

    /// Upgrades a raw socket into a registered WebSocket connection.
    ///
    /// `nonce` is the value of the request's `Sec-WebSocket-Key` header;
    /// `initial` holds any bytes the caller read past the end of the request
    /// head (a client may transmit frames in the same segment as its
    /// upgrade request).
    ///
    /// On success the 101 response has been written, the connection is OPEN
    /// and registered, a [`WsEvent::Connected`] event has been emitted, and
    /// a read task owns the socket until it closes.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] if the nonce is invalid or the response
    /// write fails.  Nothing is registered on error; the caller drops the
    /// socket.
    pub async fn handle_upgrade<S>(
        self: &Arc<Self>,
        stream: S,
        nonce: &str,
        initial: Vec<u8>,
    ) -> Result<ConnectionId, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let response = handshake::response(nonce)?;

        let (read_half, mut write_half) = tokio::io::split(stream);
        write_half.write_all(response.as_bytes()).await?;
        write_half.flush().await?;

        // The handshake response is on the wire: CONNECTING → OPEN.
        let id = ConnectionId::new_v4();
        let handle = ConnectionHandle::new(id, Box::new(write_half));
        handle.set_ready_state(ReadyState::Open);

        self.connections.lock().await.insert(id, handle.clone());
        info!("websocket connection {id} established");
        let _ = self.events.send(WsEvent::Connected(handle.clone())).await;

        let registry = Arc::clone(self);
        let events = self.events.clone();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            Connection::new(handle, events, initial, idle_timeout)
                .run(read_half)
                .await;
            registry.remove(id).await;
        });

        Ok(id)
    }

    /// Drops a connection whose socket has closed, emitting
    /// [`WsEvent::Disconnected`].
    async fn remove(&self, id: ConnectionId) {
        let Some(handle) = self.connections.lock().await.remove(&id) else {
            return;
        };
        handle.set_ready_state(ReadyState::Closed);
        let _ = handle.shutdown_socket().await;
        info!("websocket connection {id} closed");
        let _ = self
            .events
            .send(WsEvent::Disconnected { connection_id: id })
            .await;
    }

    /// Number of currently registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Snapshot of the active connection handles.
    pub async fn active(&self) -> Vec<ConnectionHandle> {
        self.connections.lock().await.values().cloned().collect()
    }

    /// Sends a text message to every registered connection, returning how
    /// many sends succeeded.  A failed send only affects its own
    /// connection; its read task will notice the dead socket and unregister
    /// it.
    pub async fn broadcast(&self, text: &str) -> usize {
        let handles = self.active().await;
        let mut delivered = 0;
        for handle in handles {
            match handle.send(text).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!("broadcast to {} failed: {e}", handle.id()),
            }
        }
        delivered
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
