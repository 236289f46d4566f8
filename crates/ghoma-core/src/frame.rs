//! Binary frame encoding/decoding
//!
//! G-Homa frame format (all integers big-endian):
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ Byte 0-1:   Prefix (0x5A 0xA5)                            │
//! │ Byte 2-3:   Payload length (uint16)                       │
//! ├───────────────────────────────────────────────────────────┤
//! │ Payload     first byte is the command code                │
//! ├───────────────────────────────────────────────────────────┤
//! │ Checksum    0xFF - (sum(payload) mod 256)                 │
//! │ Postfix     0x5B 0xB5                                     │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Start-of-frame marker
pub const PREFIX: [u8; 2] = [0x5A, 0xA5];

/// End-of-frame marker
pub const POSTFIX: [u8; 2] = [0x5B, 0xB5];

/// Prefix + length
pub const HEADER_SIZE: usize = 4;

/// Checksum + postfix
pub const TRAILER_SIZE: usize = 3;

/// Maximum payload size
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Default cap on unframed bytes a [`FrameDecoder`] will hold: one
/// maximum-size frame, so anything [`encode`] produces can be decoded
pub const DEFAULT_MAX_BUFFER: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + TRAILER_SIZE;

/// Compute the frame checksum of a payload.
pub fn checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}

/// Encode a payload into a complete wire frame.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    buf.put_slice(&PREFIX);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    buf.put_u8(checksum(payload));
    buf.put_slice(&POSTFIX);

    Ok(buf.freeze())
}

/// Try to decode one frame from the start of `buf`.
///
/// Returns `Ok(None)` while the frame is incomplete; the caller keeps the
/// bytes and retries once more data has arrived. On success the second tuple
/// element is the number of bytes the frame occupied.
pub fn decode_next(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let prefix_len = buf.len().min(PREFIX.len());
    if buf[..prefix_len] != PREFIX[..prefix_len] {
        let offset = buf.windows(PREFIX.len()).position(|w| w == PREFIX);
        return Err(Error::InvalidPrefix { offset });
    }

    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let total = HEADER_SIZE + payload_len + TRAILER_SIZE;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &buf[HEADER_SIZE..HEADER_SIZE + payload_len];
    let received = buf[HEADER_SIZE + payload_len];
    let postfix = &buf[total - POSTFIX.len()..total];

    if postfix != POSTFIX {
        return Err(Error::InvalidPostfix {
            found: hex::encode(postfix),
        });
    }

    let computed = checksum(payload);
    if received != computed {
        return Err(Error::ChecksumMismatch { received, computed });
    }

    Ok(Some((Frame::new(Bytes::copy_from_slice(payload)), total)))
}

/// A decoded G-Homa frame
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Create a new frame with payload
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Full payload, command byte included
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Value of the length field
    pub fn length(&self) -> usize {
        self.payload.len()
    }

    /// Checksum byte carried on the wire
    pub fn checksum(&self) -> u8 {
        checksum(&self.payload)
    }

    /// Command code (first payload byte)
    pub fn command(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<Bytes> {
        encode(&self.payload)
    }

    /// Calculate the total frame size on the wire
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[{}B | {}]", self.payload.len(), hex::encode(&self.payload))
    }
}

/// Per-connection receive accumulator.
///
/// Bytes are appended as the transport delivers them; complete frames are
/// drained from the front one at a time. A framing error leaves the decoder
/// in an unusable state and the connection must be dropped.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_buffer: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
            max_buffer,
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match decode_next(&self.buf)? {
            Some((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            None if self.buf.len() > self.max_buffer => Err(Error::BufferOverflow {
                size: self.buf.len(),
                max: self.max_buffer,
            }),
            None => Ok(None),
        }
    }

    /// Feed data and drain every complete frame.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
