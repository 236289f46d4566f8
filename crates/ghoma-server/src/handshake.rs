//! Connection handshake state machine
//!
//! ```text
//! connect ── INIT1 ──▶ AwaitingInit1Reply
//!                          │ INIT1 reply (trigger code, short mac) ── INIT2 ──▶
//!                          ▼
//!                      AwaitingInit2FirstReply
//!                          │ INIT2 reply, tail ends with short mac (full mac)
//!                          ▼
//!                      AwaitingInit2SecondReply
//!                          │ INIT2 reply, tail ends with firmware
//!                          ▼
//!                      Registered
//! ```
//!
//! The machine is pure: it never touches the registry or the socket. The
//! connection task acts on the returned [`HandshakeStep`].

use ghoma_core::{Firmware, FullMac, Message, ShortMac, TriggerCode};

/// Where a connection is in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingInit1Reply,
    AwaitingInit2FirstReply,
    AwaitingInit2SecondReply,
    Registered,
}

/// Everything learned about a plug during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub short_mac: ShortMac,
    pub trigger_code: TriggerCode,
    /// Absent if the plug skipped the first INIT2 reply
    pub full_mac: Option<FullMac>,
    pub firmware: Firmware,
}

impl DeviceIdentity {
    pub fn device_id(&self) -> String {
        self.short_mac.device_id()
    }
}

/// What the connection task must do after a handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Send INIT2
    SendInit2,
    /// Full MAC stored, wait for the second INIT2 reply
    AwaitSecondReply,
    /// Handshake finished; register the device
    Complete(DeviceIdentity),
    /// The message does not apply in the current state
    Ignored,
}

/// Per-connection handshake progress
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
    trigger_code: Option<TriggerCode>,
    short_mac: Option<ShortMac>,
    full_mac: Option<FullMac>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitingInit1Reply,
            trigger_code: None,
            short_mac: None,
            full_mac: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state == HandshakeState::Registered
    }

    pub fn short_mac(&self) -> Option<ShortMac> {
        self.short_mac
    }

    /// Registry key, known once the INIT1 reply arrived
    pub fn device_id(&self) -> Option<String> {
        self.short_mac.map(|mac| mac.device_id())
    }

    /// Feed a decoded message. Non-handshake messages are ignored.
    pub fn handle(&mut self, message: &Message) -> HandshakeStep {
        match message {
            Message::Init1Reply {
                trigger_code,
                short_mac,
            } => self.on_init1_reply(*trigger_code, *short_mac),
            Message::Init2Reply { tail } => self.on_init2_reply(tail),
            _ => HandshakeStep::Ignored,
        }
    }

    /// A repeated INIT1 reply before registration restarts identity capture.
    pub fn on_init1_reply(&mut self, trigger_code: TriggerCode, short_mac: ShortMac) -> HandshakeStep {
        if self.is_registered() {
            return HandshakeStep::Ignored;
        }

        self.trigger_code = Some(trigger_code);
        self.short_mac = Some(short_mac);
        self.full_mac = None;
        self.state = HandshakeState::AwaitingInit2FirstReply;
        HandshakeStep::SendInit2
    }

    pub fn on_init2_reply(&mut self, tail: &[u8; 6]) -> HandshakeStep {
        let (Some(short_mac), Some(trigger_code)) = (self.short_mac, self.trigger_code) else {
            return HandshakeStep::Ignored;
        };

        match self.state {
            HandshakeState::AwaitingInit2FirstReply | HandshakeState::AwaitingInit2SecondReply => {}
            _ => return HandshakeStep::Ignored,
        }

        if tail[3..] == short_mac.as_bytes()[..] {
            self.full_mac = Some(FullMac(*tail));
            self.state = HandshakeState::AwaitingInit2SecondReply;
            return HandshakeStep::AwaitSecondReply;
        }

        self.state = HandshakeState::Registered;
        HandshakeStep::Complete(DeviceIdentity {
            short_mac,
            trigger_code,
            full_mac: self.full_mac,
            firmware: Firmware::new(tail[3], tail[4], tail[5]),
        })
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: ShortMac = ShortMac([0xD7, 0x8A, 0x91]);
    const TRIGGER: TriggerCode = TriggerCode([0x32, 0x23]);

    #[test]
    fn test_full_handshake() {
        let mut hs = Handshake::new();
        assert_eq!(hs.state(), HandshakeState::AwaitingInit1Reply);
        assert_eq!(hs.device_id(), None);

        assert_eq!(hs.on_init1_reply(TRIGGER, MAC), HandshakeStep::SendInit2);
        assert_eq!(hs.state(), HandshakeState::AwaitingInit2FirstReply);
        assert_eq!(hs.device_id().as_deref(), Some("d78a91"));

        let first = [0xAC, 0xCF, 0x23, 0xD7, 0x8A, 0x91];
        assert_eq!(hs.on_init2_reply(&first), HandshakeStep::AwaitSecondReply);
        assert_eq!(hs.state(), HandshakeState::AwaitingInit2SecondReply);

        let second = [0x00, 0x00, 0x00, 0x01, 0x00, 0x06];
        let step = hs.on_init2_reply(&second);
        assert_eq!(
            step,
            HandshakeStep::Complete(DeviceIdentity {
                short_mac: MAC,
                trigger_code: TRIGGER,
                full_mac: Some(FullMac(first)),
                firmware: Firmware::new(1, 0, 6),
            })
        );
        assert!(hs.is_registered());
    }

    #[test]
    fn test_init2_before_init1_is_ignored() {
        let mut hs = Handshake::new();
        assert_eq!(hs.on_init2_reply(&[0; 6]), HandshakeStep::Ignored);
        assert_eq!(hs.state(), HandshakeState::AwaitingInit1Reply);
    }

    #[test]
    fn test_second_reply_without_first() {
        let mut hs = Handshake::new();
        hs.on_init1_reply(TRIGGER, MAC);

        match hs.on_init2_reply(&[0, 0, 0, 2, 1, 3]) {
            HandshakeStep::Complete(identity) => {
                assert_eq!(identity.full_mac, None);
                assert_eq!(identity.firmware, Firmware::new(2, 1, 3));
            }
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn test_registered_ignores_handshake_messages() {
        let mut hs = Handshake::new();
        hs.on_init1_reply(TRIGGER, MAC);
        hs.on_init2_reply(&[0, 0, 0, 1, 0, 6]);

        assert_eq!(hs.on_init1_reply(TRIGGER, MAC), HandshakeStep::Ignored);
        assert_eq!(hs.on_init2_reply(&[0, 0, 0, 1, 0, 7]), HandshakeStep::Ignored);
        assert!(hs.is_registered());
    }

    #[test]
    fn test_handle_dispatches_messages() {
        let mut hs = Handshake::new();
        assert_eq!(hs.handle(&Message::Heartbeat), HandshakeStep::Ignored);
        assert_eq!(
            hs.handle(&Message::Init1Reply {
                trigger_code: TRIGGER,
                short_mac: MAC,
            }),
            HandshakeStep::SendInit2
        );
        assert_eq!(
            hs.handle(&Message::Init2Reply {
                tail: [0xAC, 0xCF, 0x23, 0xD7, 0x8A, 0x91],
            }),
            HandshakeStep::AwaitSecondReply
        );
    }
}
