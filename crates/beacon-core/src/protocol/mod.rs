//! Protocol module containing the handshake derivation and the frame codec.

pub mod decoder;
pub mod frame;
pub mod handshake;

pub use decoder::{DecodeState, FrameDecoder};
pub use frame::{Frame, Opcode, ProtocolError};
pub use handshake::HandshakeError;
