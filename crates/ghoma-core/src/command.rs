//! Outbound command encoding
//!
//! Every command is a fixed payload (or a fixed template with the plug's
//! trigger code and short MAC spliced in) wrapped by [`frame::encode`].

use bytes::{Bytes, BytesMut};

use crate::frame;
use crate::message::cmd;
use crate::types::{ShortMac, SwitchState, TriggerCode};
use crate::Result;

/// First INIT1 frame
pub const INIT1A: [u8; 7] = [cmd::INIT1, 0x05, 0x0D, 0x07, 0x05, 0x07, 0x12];

/// Second INIT1 frame, sent back-to-back with [`INIT1A`]
pub const INIT1B: [u8; 1] = [cmd::INIT1];

pub const INIT2: [u8; 2] = [cmd::INIT2, 0x01];

pub const HEARTBEAT_REPLY: [u8; 1] = [cmd::HEARTBEAT_REPLY];

/// Switch command bytes before the trigger code
const SWITCH_HEAD: [u8; 5] = [cmd::SWITCH, 0x01, 0x01, 0x0A, 0xE0];

/// Switch command bytes between the short MAC and the state byte
const SWITCH_BODY: [u8; 12] = [
    0xFF, 0xFE, 0x00, 0x00, 0x10, 0x11, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
];

/// A command sent from the server to a plug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Opens the handshake
    Init1,
    /// Second handshake step, after the INIT1 reply
    Init2,
    /// Acknowledges a heartbeat
    HeartbeatReply,
    /// Turns the relay on or off
    Switch {
        trigger_code: TriggerCode,
        short_mac: ShortMac,
        on: bool,
    },
}

impl Command {
    pub fn switch(trigger_code: TriggerCode, short_mac: ShortMac, state: SwitchState) -> Self {
        Command::Switch {
            trigger_code,
            short_mac,
            on: state == SwitchState::On,
        }
    }

    /// Encode to wire bytes, framing included.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Command::Init1 => {
                let mut wire = BytesMut::new();
                wire.extend_from_slice(&frame::encode(&INIT1A)?);
                wire.extend_from_slice(&frame::encode(&INIT1B)?);
                Ok(wire.freeze())
            }
            Command::Init2 => frame::encode(&INIT2),
            Command::HeartbeatReply => frame::encode(&HEARTBEAT_REPLY),
            Command::Switch { .. } => frame::encode(&self.payload()),
        }
    }

    /// Payload of a single-frame command (for INIT1, the first frame only).
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Command::Init1 => INIT1A.to_vec(),
            Command::Init2 => INIT2.to_vec(),
            Command::HeartbeatReply => HEARTBEAT_REPLY.to_vec(),
            Command::Switch {
                trigger_code,
                short_mac,
                on,
            } => {
                let mut payload = Vec::with_capacity(23);
                payload.extend_from_slice(&SWITCH_HEAD);
                payload.extend_from_slice(trigger_code.as_bytes());
                payload.extend_from_slice(short_mac.as_bytes());
                payload.extend_from_slice(&SWITCH_BODY);
                payload.push(if *on { 0xFF } else { 0x00 });
                payload
            }
        }
    }

    /// Short label for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init1 => "INIT1",
            Command::Init2 => "INIT2",
            Command::HeartbeatReply => "HEARTBEAT RPLY",
            Command::Switch { on: true, .. } => "ON",
            Command::Switch { on: false, .. } => "OFF",
        }
    }
}
