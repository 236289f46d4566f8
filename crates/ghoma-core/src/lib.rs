//! G-Homa Core
//!
//! Wire format and message primitives for the G-Homa smart plug protocol.
//!
//! This crate provides:
//! - Frame encoding/decoding with checksum verification ([`Frame`], [`FrameDecoder`])
//! - Outbound commands: handshake, heartbeat reply, switch ([`Command`])
//! - Inbound message classification ([`Message`], [`StatusReport`])
//! - Identity and state types ([`ShortMac`], [`SwitchState`], [`EnergyMetric`])
//! - Timing utilities ([`Timestamp`])

pub mod command;
pub mod error;
pub mod frame;
pub mod message;
pub mod status;
pub mod time;
pub mod types;

pub use command::Command;
pub use error::{Error, Result};
pub use frame::{Frame, FrameDecoder};
pub use message::Message;
pub use status::StatusReport;
pub use time::Timestamp;
pub use types::*;

/// TCP port the plugs are usually configured to reach
pub const DEFAULT_PORT: u16 = 4196;
