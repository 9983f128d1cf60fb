//! # beacon-core
//!
//! The WebSocket protocol engine behind beacon's live-reload channel: a
//! from-scratch RFC 6455 server implementation covering the HTTP upgrade
//! handshake, a resumable frame codec, per-connection message reassembly,
//! and the registry that owns every active session.
//!
//! The crate deliberately knows nothing about HTTP routing, static files,
//! or file watching.  The embedding server parses the upgrade request,
//! decides that a socket should speak WebSocket, and hands the raw stream to
//! [`ConnectionRegistry::handle_upgrade`]; everything after that point —
//! handshake response, frame decoding, ping/pong, close — happens here.
//!
//! - **`protocol`** – Pure byte-level logic: the [`protocol::handshake`]
//!   accept-key derivation and the [`protocol::frame`] /
//!   [`protocol::decoder`] codec.  No I/O, fully testable with byte slices.
//!
//! - **`connection`** – One socket's lifecycle: ready-state transitions,
//!   fragment reassembly, control-frame handling, and the
//!   [`connection::ConnectionHandle`] used to send frames back.
//!
//! - **`registry`** – The active-connection set, the upgrade entry point,
//!   and the [`registry::WsEvent`] stream the embedding application
//!   consumes.

pub mod connection;
pub mod protocol;
pub mod registry;

// Re-export the types callers touch most, so the embedding server can write
// `beacon_core::ConnectionRegistry` instead of the full path.
pub use connection::{ConnectionError, ConnectionHandle, ConnectionId, Message, ReadyState, SendError};
pub use protocol::decoder::{DecodeState, FrameDecoder};
pub use protocol::frame::{Frame, Opcode, ProtocolError};
pub use protocol::handshake::{self, HandshakeError};
pub use registry::{ConnectionRegistry, WsEvent};
