//! Inbound message decoding
//!
//! Classifies a decoded [`Frame`] by its command byte and extracts the
//! fields the server needs. Layouts (offsets into the payload, command byte
//! at offset 0):
//!
//! ```text
//! INIT1 reply  03 .. .. .. [trigger 4..6] [short mac 6..9] ..
//! INIT2 reply  07 .. ......................... [last 6 bytes]
//! heartbeat    04 ..
//! status       90 .. (see status module)
//! ```

use crate::status::StatusReport;
use crate::types::{ShortMac, TriggerCode};
use crate::{Error, Frame, Result};

/// Command codes
pub mod cmd {
    pub const INIT1: u8 = 0x02;
    pub const INIT1_REPLY: u8 = 0x03;
    pub const HEARTBEAT: u8 = 0x04;
    pub const INIT2: u8 = 0x05;
    pub const HEARTBEAT_REPLY: u8 = 0x06;
    pub const INIT2_REPLY: u8 = 0x07;
    pub const SWITCH: u8 = 0x10;
    pub const STATUS: u8 = 0x90;
}

/// A message received from a plug
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Reply to INIT1 carrying the plug's identity fragments
    Init1Reply {
        trigger_code: TriggerCode,
        short_mac: ShortMac,
    },
    /// Reply to INIT2; sent twice, distinguished by the tail
    Init2Reply { tail: [u8; 6] },
    /// Liveness ping
    Heartbeat,
    /// Switch state or energy report
    Status(StatusReport),
    /// Anything else
    Unknown { command: u8 },
}

impl Message {
    /// Decode a message from a frame payload.
    ///
    /// Unknown command codes are not an error; truncated payloads of known
    /// commands are.
    pub fn decode(frame: &Frame) -> Result<Self> {
        Self::decode_payload(frame.payload())
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        let command = *payload.first().ok_or(Error::EmptyPayload)?;

        match command {
            cmd::INIT1_REPLY => {
                if payload.len() < 9 {
                    return Err(Error::payload_too_short("INIT1 reply", 9, payload.len()));
                }
                let trigger_code = TriggerCode([payload[4], payload[5]]);
                let short_mac = ShortMac([payload[6], payload[7], payload[8]]);
                Ok(Message::Init1Reply {
                    trigger_code,
                    short_mac,
                })
            }
            cmd::INIT2_REPLY => {
                // command byte plus six tail bytes
                if payload.len() < 7 {
                    return Err(Error::payload_too_short("INIT2 reply", 7, payload.len()));
                }
                let mut tail = [0u8; 6];
                tail.copy_from_slice(&payload[payload.len() - 6..]);
                Ok(Message::Init2Reply { tail })
            }
            cmd::HEARTBEAT => Ok(Message::Heartbeat),
            cmd::STATUS => Ok(Message::Status(StatusReport::decode(payload)?)),
            other => Ok(Message::Unknown { command: other }),
        }
    }

    /// Short label for logging
    pub fn name(&self) -> &'static str {
        match self {
            Message::Init1Reply { .. } => "INIT1 RPLY",
            Message::Init2Reply { .. } => "INIT2 RPLY",
            Message::Heartbeat => "HEARTBEAT",
            Message::Status(StatusReport::Switch { .. }) => "STATUS",
            Message::Status(StatusReport::Measurement { .. }) => "MEASURE",
            Message::Unknown { .. } => "UNSUP CMD",
        }
    }
}
