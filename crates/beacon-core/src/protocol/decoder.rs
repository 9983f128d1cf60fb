//! Resumable frame decoder.
//!
//! TCP delivers bytes in arbitrary chunks: a single `read()` can return half
//! a header, three frames, or one byte of a masking key.  The decoder
//! therefore never assumes a complete frame is buffered.  [`FrameDecoder::feed`]
//! appends whatever arrived, and [`FrameDecoder::next_frame`] walks the parse
//! states, suspending (returning `Ok(None)` with all state preserved) the
//! moment the current state needs bytes that are not buffered yet.
//!
//! The four states mirror the frame layout: fixed header, extended length,
//! masking key, payload.  Scratch fields for the frame being parsed live on
//! the decoder and are reset when the frame completes.

use std::collections::VecDeque;

use super::frame::{apply_mask, Frame, Opcode, ProtocolError, MAX_CONTROL_PAYLOAD};

/// Position within the current frame's parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Waiting for the 2 fixed header bytes.
    Header,
    /// Waiting for the 2- or 8-byte extended length (or nothing, for the
    /// literal tier).
    ExtLength,
    /// Waiting for the 4-byte masking key.
    MaskKey,
    /// Waiting for the declared number of payload bytes.
    Payload,
}

/// Ordered queue of received byte chunks with a running total, consumed
/// strictly left to right.
#[derive(Debug, Default)]
struct ChunkQueue {
    chunks: VecDeque<Vec<u8>>,
    buffered: usize,
}

impl ChunkQueue {
    fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.buffered += chunk.len();
        self.chunks.push_back(chunk);
    }

    fn len(&self) -> usize {
        self.buffered
    }

    /// Removes and returns the next `n` bytes.  Callers must check
    /// [`ChunkQueue::len`] first; the decoder only consumes what it has
    /// confirmed is buffered.
    fn consume(&mut self, n: usize) -> Vec<u8> {
        debug_assert!(n <= self.buffered, "consume past end of buffered data");
        self.buffered -= n;

        let mut out = Vec::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if remaining < front.len() {
                out.extend_from_slice(&front[..remaining]);
                front.drain(..remaining);
                remaining = 0;
            } else {
                remaining -= front.len();
                out.extend_from_slice(front);
                self.chunks.pop_front();
            }
        }
        out
    }
}

/// Streaming WebSocket frame decoder for the server side of a connection.
///
/// Client frames must be masked; an unmasked frame is rejected as a protocol
/// violation rather than tolerated (see [`ProtocolError::UnmaskedFrame`]).
///
/// # Example
///
/// ```rust
/// use beacon_core::protocol::{Frame, FrameDecoder};
///
/// let wire = Frame::text("hello").masked([1, 2, 3, 4]).encode();
/// let mut decoder = FrameDecoder::new();
///
/// // Deliver the frame one byte at a time: the decoder suspends until the
/// // current state has enough bytes.
/// let mut decoded = None;
/// for byte in wire {
///     decoder.feed(&[byte]);
///     if let Some(frame) = decoder.next_frame().unwrap() {
///         decoded = Some(frame);
///     }
/// }
/// assert_eq!(decoded.unwrap().payload, b"hello");
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    queue: ChunkQueue,
    state: DecodeState,

    // Scratch state for the frame currently being parsed.
    fin: bool,
    opcode: Opcode,
    masked: bool,
    length_indicator: u8,
    payload_len: usize,
    mask_key: [u8; 4],

    // Whether a fragmented message is open, judged from the frame sequence
    // alone: a data frame with FIN = 0 opens one, a data frame with FIN = 1
    // closes it, control frames never touch it.
    fragment_open: bool,
}

impl FrameDecoder {
    /// Creates a decoder positioned at the start of a frame.
    pub fn new() -> Self {
        Self {
            queue: ChunkQueue::default(),
            state: DecodeState::Header,
            fin: false,
            opcode: Opcode::Continuation,
            masked: false,
            length_indicator: 0,
            payload_len: 0,
            mask_key: [0; 4],
            fragment_open: false,
        }
    }

    /// Appends newly received bytes to the inbound buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.queue.push(chunk.to_vec());
    }

    /// Number of buffered bytes not yet consumed by the parse.
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    /// Current parse state, for diagnostics.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Advances the parse as far as the buffered bytes allow.
    ///
    /// Returns `Ok(Some(frame))` when a complete frame (payload already
    /// unmasked) was decoded, and `Ok(None)` when more bytes are needed —
    /// call again after the next [`FrameDecoder::feed`].
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] on any violation listed in the error
    /// type.  The decoder must not be reused afterwards; the byte stream
    /// cannot be resynchronized.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if self.queue.len() < 2 {
                        return Ok(None);
                    }
                    let bytes = self.queue.consume(2);
                    self.read_header(bytes[0], bytes[1])?;
                    self.state = DecodeState::ExtLength;
                }

                DecodeState::ExtLength => {
                    match self.length_indicator {
                        126 => {
                            if self.queue.len() < 2 {
                                return Ok(None);
                            }
                            let bytes = self.queue.consume(2);
                            self.payload_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
                        }
                        127 => {
                            if self.queue.len() < 8 {
                                return Ok(None);
                            }
                            let bytes = self.queue.consume(8);
                            let declared = u64::from_be_bytes([
                                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
                                bytes[6], bytes[7],
                            ]);
                            // RFC 6455 forbids the top bit; anything that
                            // does not fit usize cannot be buffered either.
                            // Reject explicitly instead of truncating.
                            if declared > i64::MAX as u64 {
                                return Err(ProtocolError::LengthOverflow(declared));
                            }
                            self.payload_len = usize::try_from(declared)
                                .map_err(|_| ProtocolError::LengthOverflow(declared))?;
                        }
                        literal => self.payload_len = literal as usize,
                    }
                    self.state = DecodeState::MaskKey;
                }

                DecodeState::MaskKey => {
                    if !self.masked {
                        return Err(ProtocolError::UnmaskedFrame);
                    }
                    if self.queue.len() < 4 {
                        return Ok(None);
                    }
                    let bytes = self.queue.consume(4);
                    self.mask_key = [bytes[0], bytes[1], bytes[2], bytes[3]];
                    self.state = DecodeState::Payload;
                }

                DecodeState::Payload => {
                    if self.queue.len() < self.payload_len {
                        return Ok(None);
                    }
                    let mut payload = self.queue.consume(self.payload_len);
                    apply_mask(&mut payload, self.mask_key);

                    if self.opcode.is_data() {
                        self.fragment_open = !self.fin;
                    }

                    let frame = Frame {
                        fin: self.fin,
                        opcode: self.opcode,
                        mask_key: None,
                        payload,
                    };
                    self.state = DecodeState::Header;
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Parses and validates the 2 fixed header bytes.
    fn read_header(&mut self, byte0: u8, byte1: u8) -> Result<(), ProtocolError> {
        if byte0 & 0x70 != 0 {
            return Err(ProtocolError::ReservedBitsSet);
        }
        self.fin = byte0 & 0x80 != 0;
        self.opcode = Opcode::from_u8(byte0 & 0x0F)?;
        self.masked = byte1 & 0x80 != 0;
        self.length_indicator = byte1 & 0x7F;

        if self.opcode.is_control() {
            if !self.fin {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if self.length_indicator as usize > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::OversizedControlFrame(
                    self.length_indicator as usize,
                ));
            }
        } else if self.opcode == Opcode::Continuation && !self.fragment_open {
            return Err(ProtocolError::UnexpectedContinuation);
        }

        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
