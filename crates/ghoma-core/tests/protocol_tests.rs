//! Protocol tests
//!
//! Byte-level traces of a plug session, decoded with the public API:
//! - Handshake frames the server sends and the replies a plug returns
//! - Switch reports and energy measurements
//! - Switch commands addressed with the plug's trigger code

use ghoma_core::message::cmd;
use ghoma_core::status::MEASURE_SIGNATURE;
use ghoma_core::{
    frame, Command, EnergyMetric, FrameDecoder, Message, ShortMac, StatusReport, SwitchState,
    TriggerCode, Triggered,
};

const TRIGGER: [u8; 2] = [0x32, 0x23];
const SHORT_MAC: [u8; 3] = [0xD7, 0x8A, 0x91];

fn decode_all(wire: &[u8]) -> Vec<Message> {
    FrameDecoder::new()
        .feed(wire)
        .expect("framing error")
        .iter()
        .map(|f| Message::decode(f).expect("decode error"))
        .collect()
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_init1_reply_identity() {
    let mut payload = vec![cmd::INIT1_REPLY, 0x01, 0x0A, 0xC0];
    payload.extend_from_slice(&TRIGGER);
    payload.extend_from_slice(&SHORT_MAC);
    payload.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);

    let messages = decode_all(&frame::encode(&payload).unwrap());
    assert_eq!(
        messages,
        vec![Message::Init1Reply {
            trigger_code: TriggerCode(TRIGGER),
            short_mac: ShortMac(SHORT_MAC),
        }]
    );
}

#[test]
fn test_init2_replies_back_to_back() {
    let full_mac = [0xAC, 0xCF, 0x23, 0xD7, 0x8A, 0x91];
    let mut first = vec![cmd::INIT2_REPLY, 0x01, 0x0A, 0xC0, 0x00, 0x06];
    first.extend_from_slice(&full_mac);
    let second = vec![cmd::INIT2_REPLY, 0x01, 0x0A, 0xC0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x06];

    let mut wire = frame::encode(&first).unwrap().to_vec();
    wire.extend_from_slice(&frame::encode(&second).unwrap());

    let messages = decode_all(&wire);
    assert_eq!(messages.len(), 2);
    match (&messages[0], &messages[1]) {
        (Message::Init2Reply { tail: a }, Message::Init2Reply { tail: b }) => {
            assert_eq!(&a[3..], &SHORT_MAC);
            assert_ne!(&b[3..], &SHORT_MAC);
            assert_eq!(&b[3..], &[0x01, 0x00, 0x06]);
        }
        other => panic!("expected two INIT2 replies, got {:?}", other),
    }
}

#[test]
fn test_server_handshake_commands() {
    let wire = Command::Init1.encode().unwrap();
    let frames = FrameDecoder::new().feed(&wire).unwrap();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.command() == Some(cmd::INIT1)));

    let wire = Command::Init2.encode().unwrap();
    let frames = FrameDecoder::new().feed(&wire).unwrap();
    assert_eq!(frames[0].payload().as_ref(), &[cmd::INIT2, 0x01]);
}

// ============================================================================
// Status reports
// ============================================================================

fn status_payload(trigger_byte: u8, state: u8) -> Vec<u8> {
    let mut payload = vec![cmd::STATUS, 0x01, 0x0A, 0xE0];
    payload.extend_from_slice(&TRIGGER);
    payload.extend_from_slice(&SHORT_MAC);
    payload.extend_from_slice(&[0xFF, 0xFE, 0x01, trigger_byte, 0x11, 0x00, 0x00, 0x01]);
    payload.extend_from_slice(&[0x00, 0x00, 0x00, state]);
    payload
}

fn measurement_payload(metric: u8, raw: u32) -> Vec<u8> {
    let mut payload = vec![cmd::STATUS, 0x01, 0x0A, 0xE0];
    payload.extend_from_slice(&TRIGGER);
    payload.extend_from_slice(&SHORT_MAC);
    payload.extend_from_slice(&MEASURE_SIGNATURE);
    payload.extend_from_slice(&[0x03, metric, 0x01]);
    payload.extend_from_slice(&raw.to_be_bytes()[1..]);
    payload
}

#[test]
fn test_switch_report_over_the_wire() {
    let messages = decode_all(&frame::encode(&status_payload(0x81, 0xFF)).unwrap());
    assert_eq!(
        messages,
        vec![Message::Status(StatusReport::Switch {
            state: Some(SwitchState::On),
            raw_state: 0xFF,
            triggered: Triggered::Local,
        })]
    );

    let messages = decode_all(&frame::encode(&status_payload(0x11, 0x00)).unwrap());
    assert_eq!(
        messages,
        vec![Message::Status(StatusReport::Switch {
            state: Some(SwitchState::Off),
            raw_state: 0x00,
            triggered: Triggered::Remote,
        })]
    );
}

#[test]
fn test_measurement_stream() {
    let readings = [(1u8, 5000u32, 50.0f64), (2, 12345, 12.345), (3, 23012, 230.12)];
    let mut wire = Vec::new();
    for (metric, raw, _) in readings {
        wire.extend_from_slice(&frame::encode(&measurement_payload(metric, raw)).unwrap());
    }

    let messages = decode_all(&wire);
    assert_eq!(messages.len(), readings.len());

    for (msg, (code, raw, expected)) in messages.iter().zip(readings) {
        match msg {
            Message::Status(StatusReport::Measurement {
                metric,
                raw: got_raw,
                value,
            }) => {
                assert_eq!(*metric, EnergyMetric::from_code(code));
                assert_eq!(*got_raw, raw);
                assert_eq!(*value, expected);
            }
            other => panic!("expected measurement, got {:?}", other),
        }
    }
}

// ============================================================================
// Switch commands
// ============================================================================

#[test]
fn test_switch_command_frames() {
    let on = Command::Switch {
        trigger_code: TriggerCode(TRIGGER),
        short_mac: ShortMac(SHORT_MAC),
        on: true,
    };
    let frames = FrameDecoder::new().feed(&on.encode().unwrap()).unwrap();
    assert_eq!(frames.len(), 1);

    let payload = frames[0].payload();
    assert_eq!(payload[0], cmd::SWITCH);
    assert_eq!(&payload[5..7], &TRIGGER);
    assert_eq!(&payload[7..10], &SHORT_MAC);
    assert_eq!(payload[payload.len() - 1], 0xFF);
    assert_eq!(on.name(), "ON");
}
