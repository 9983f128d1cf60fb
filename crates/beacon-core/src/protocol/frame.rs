//! WebSocket frame types and the outbound frame encoder.
//!
//! Wire format (RFC 6455 §5.2):
//! ```text
//! [byte0: FIN(1) RSV1-3(3) opcode(4)]
//! [byte1: MASK(1) length-indicator(7)]
//! [extended length: 0, 2, or 8 bytes, big-endian]
//! [masking key: 0 or 4 bytes]
//! [payload: masked if a key is present]
//! ```
//!
//! The length indicator selects one of three tiers: values 0–125 are the
//! length itself, 126 announces a 16-bit extended length, and 127 announces
//! a 64-bit extended length.

use thiserror::Error;

/// Close status code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close status code sent when the peer violated the protocol.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Largest payload a control frame (close/ping/pong) may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// WebSocket frame opcode (the low 4 bits of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text data frame.
    Text = 0x1,
    /// Binary data frame.
    Binary = 0x2,
    // 0x3–0x7 are reserved for future data frames.
    /// Connection close control frame.
    Close = 0x8,
    /// Ping control frame.
    Ping = 0x9,
    /// Pong control frame.
    Pong = 0xA,
    // 0xB–0xF are reserved for future control frames.
}

impl Opcode {
    /// Parses an opcode from its 4-bit wire value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownOpcode`] for any reserved value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    /// Returns true for close, ping, and pong frames.
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns true for continuation, text, and binary frames.
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }
}

/// Errors raised while decoding an inbound frame stream.
///
/// Every variant is terminal for its connection: a broken frame stream
/// cannot be resynchronized, so the decoder aborts and the connection is
/// closed after an attempted close frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The 4-bit opcode is one of the reserved values.
    #[error("unknown opcode: 0x{0:X}")]
    UnknownOpcode(u8),

    /// One of RSV1–RSV3 is set; no extension is ever negotiated.
    #[error("reserved header bits set without a negotiated extension")]
    ReservedBitsSet,

    /// A control frame arrived with FIN = 0.
    #[error("control frame must not be fragmented")]
    FragmentedControlFrame,

    /// A control frame declared a payload longer than 125 bytes.
    #[error("control frame payload of {0} bytes exceeds the 125-byte limit")]
    OversizedControlFrame(usize),

    /// A continuation frame arrived while no fragmented message was open.
    #[error("continuation frame without an open fragmented message")]
    UnexpectedContinuation,

    /// A client frame arrived without a masking key.
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// A 64-bit extended length cannot be represented on this platform.
    #[error("declared payload length {0} is not representable")]
    LengthOverflow(u64),

    /// An assembled text message was not valid UTF-8.
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,
}

/// A single WebSocket frame.
///
/// Inbound frames produced by the decoder always carry `mask_key: None` and
/// an already-unmasked payload.  Outbound server frames are built unmasked;
/// [`Frame::masked`] exists so tests (and a future client) can produce
/// client-style frames the server-side decoder will accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final-fragment flag.  Server-originated frames always set this.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Masking key; `Some` causes [`Frame::encode`] to set the MASK bit and
    /// XOR the payload.
    pub mask_key: Option<[u8; 4]>,
    /// Payload bytes (unmasked).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a single-frame text message (FIN = 1, unmasked).
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Text,
            mask_key: None,
            payload: payload.into().into_bytes(),
        }
    }

    /// Builds a single-frame binary message (FIN = 1, unmasked).
    pub fn binary(payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Binary,
            mask_key: None,
            payload,
        }
    }

    /// Builds a ping frame.
    pub fn ping(payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Ping,
            mask_key: None,
            payload,
        }
    }

    /// Builds a pong frame echoing a ping payload.
    pub fn pong(payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Pong,
            mask_key: None,
            payload,
        }
    }

    /// Builds a close frame carrying the status code as a 2-byte big-endian
    /// payload.
    pub fn close(code: u16) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Close,
            mask_key: None,
            payload: code.to_be_bytes().to_vec(),
        }
    }

    /// Returns the frame with a masking key attached, as a client would send
    /// it.
    pub fn masked(mut self, key: [u8; 4]) -> Self {
        self.mask_key = Some(key);
        self
    }

    /// Encodes the frame into wire bytes: header, extended length, masking
    /// key, and payload in one contiguous buffer, so the caller can hand the
    /// whole frame to a single write.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len();

        // Header size: 2 fixed bytes, plus the extended length tier, plus
        // the masking key when present.
        let ext_len = if len > 65535 {
            8
        } else if len > 125 {
            2
        } else {
            0
        };
        let key_len = if self.mask_key.is_some() { 4 } else { 0 };
        let mut buf = Vec::with_capacity(2 + ext_len + key_len + len);

        let mut byte0 = self.opcode as u8;
        if self.fin {
            byte0 |= 0x80;
        }
        buf.push(byte0);

        let mask_bit = if self.mask_key.is_some() { 0x80 } else { 0x00 };
        if len > 65535 {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(len as u64).to_be_bytes());
        } else if len > 125 {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            buf.push(mask_bit | len as u8);
        }

        match self.mask_key {
            Some(key) => {
                buf.extend_from_slice(&key);
                let mut masked = self.payload.clone();
                apply_mask(&mut masked, key);
                buf.extend_from_slice(&masked);
            }
            None => buf.extend_from_slice(&self.payload),
        }

        buf
    }
}

/// XORs `payload[i]` with `key[i mod 4]` in place.
///
/// Masking is an involution: applying the same key twice restores the
/// original bytes, so this one function both masks and unmasks.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
