//! Error types for the G-Homa wire protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The accumulated buffer does not start with `5A A5`
    #[error("frame prefix not at buffer start (found at offset {offset:?})")]
    InvalidPrefix { offset: Option<usize> },

    /// The bytes after the checksum are not `5B B5`
    #[error("invalid frame postfix: expected 5bb5, got {found}")]
    InvalidPostfix { found: String },

    /// Checksum byte does not match the payload
    #[error("checksum mismatch: frame carries 0x{received:02x}, payload sums to 0x{computed:02x}")]
    ChecksumMismatch { received: u8, computed: u8 },

    /// Frame payload too large for the 16-bit length field
    #[error("payload too large: {0} bytes (max 65535)")]
    PayloadTooLarge(usize),

    /// Receive buffer grew past its limit without yielding a frame
    #[error("receive buffer overflow: {size} bytes buffered (max {max})")]
    BufferOverflow { size: usize, max: usize },

    /// A known command arrived with fewer bytes than its layout needs
    #[error("payload too short for {command}: need {need} bytes, got {got}")]
    PayloadTooShort {
        command: &'static str,
        need: usize,
        got: usize,
    },

    /// Frame carried no command byte
    #[error("empty payload")]
    EmptyPayload,
}

impl Error {
    /// Framing errors poison the byte stream; the connection cannot continue.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Error::InvalidPrefix { .. }
                | Error::InvalidPostfix { .. }
                | Error::ChecksumMismatch { .. }
                | Error::BufferOverflow { .. }
        )
    }

    pub(crate) fn payload_too_short(command: &'static str, need: usize, got: usize) -> Self {
        Error::PayloadTooShort { command, need, got }
    }
}
