//! Status report decoding
//!
//! A STATUS (`0x90`) payload is either an energy measurement or a switch
//! state report. Measurements carry a fixed 8-byte signature at offset 9:
//!
//! ```text
//! 90 .. .. .. .. .. .. .. .. [FF FE 01 81 39 00 00 01] .. [type] .. [v0 v1 v2]
//!                             ^ offset 9                  len-5     len-3..len
//! ```
//!
//! Everything else is a switch report whose last byte is the relay state
//! and whose byte 12 tells who flipped it.

use crate::types::{EnergyMetric, SwitchState, Triggered};
use crate::{Error, Result};

/// Marks a status payload as an energy measurement
pub const MEASURE_SIGNATURE: [u8; 8] = [0xFF, 0xFE, 0x01, 0x81, 0x39, 0x00, 0x00, 0x01];

/// Offset of [`MEASURE_SIGNATURE`] inside the payload
pub const MEASURE_SIGNATURE_OFFSET: usize = 9;

/// Offset of the trigger-origin byte in a switch report
pub const TRIGGER_OFFSET: usize = 12;

/// Decoded STATUS payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusReport {
    Measurement {
        metric: EnergyMetric,
        /// Unscaled 24-bit reading
        raw: u32,
        /// Reading in the metric's unit
        value: f64,
    },
    Switch {
        /// `None` when the state byte is neither `FF` nor `00`
        state: Option<SwitchState>,
        raw_state: u8,
        triggered: Triggered,
    },
}

impl StatusReport {
    /// Classify and decode a STATUS payload (command byte included).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let len = payload.len();
        if len < 2 {
            return Err(Error::payload_too_short("STATUS", 2, len));
        }

        let signature_end = MEASURE_SIGNATURE_OFFSET + MEASURE_SIGNATURE.len();
        if payload.get(MEASURE_SIGNATURE_OFFSET..signature_end) == Some(&MEASURE_SIGNATURE[..]) {
            let metric = EnergyMetric::from_code(payload[len - 5]);
            let raw = read_u24(&payload[len - 3..]);
            return Ok(StatusReport::Measurement {
                metric,
                raw,
                value: metric.scale(raw),
            });
        }

        let raw_state = payload[len - 1];
        let triggered = payload
            .get(TRIGGER_OFFSET)
            .map(|b| Triggered::from_byte(*b))
            .unwrap_or_default();

        Ok(StatusReport::Switch {
            state: SwitchState::from_byte(raw_state),
            raw_state,
            triggered,
        })
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(metric: u8, raw: u32) -> Vec<u8> {
        let mut payload = vec![0x90, 0x01, 0x0A, 0xE0, 0x32, 0x23, 0xD7, 0x8A, 0x91];
        payload.extend_from_slice(&MEASURE_SIGNATURE);
        payload.extend_from_slice(&[0x03, metric, 0x00]);
        payload.extend_from_slice(&raw.to_be_bytes()[1..]);
        payload
    }

    fn switch(trigger: u8, state: u8) -> Vec<u8> {
        vec![
            0x90, 0x01, 0x0A, 0xE0, 0x32, 0x23, 0xD7, 0x8A, 0x91, 0xFF, 0xFE, 0x01, trigger, 0x11,
            0x00, 0x00, 0x01, 0x00, 0x00, 0x00, state,
        ]
    }

    #[test]
    fn test_energy_measurement() {
        let report = StatusReport::decode(&measurement(2, 12345)).unwrap();
        assert_eq!(
            report,
            StatusReport::Measurement {
                metric: EnergyMetric::Energy,
                raw: 12345,
                value: 12.345
            }
        );
    }

    #[test]
    fn test_power_measurement() {
        match StatusReport::decode(&measurement(1, 5000)).unwrap() {
            StatusReport::Measurement { metric, value, .. } => {
                assert_eq!(metric, EnergyMetric::Power);
                assert_eq!(value, 50.0);
            }
            other => panic!("expected measurement, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_metric() {
        match StatusReport::decode(&measurement(9, 100)).unwrap() {
            StatusReport::Measurement { metric, value, .. } => {
                assert_eq!(metric.name(), "unknowntype_type_9");
                assert_eq!(value, 1.0);
            }
            other => panic!("expected measurement, got {:?}", other),
        }
    }

    #[test]
    fn test_full_scale_reading() {
        match StatusReport::decode(&measurement(1, 0xFF_FFFF)).unwrap() {
            StatusReport::Measurement { raw, .. } => assert_eq!(raw, 0xFF_FFFF),
            other => panic!("expected measurement, got {:?}", other),
        }
    }

    #[test]
    fn test_switch_on_local() {
        assert_eq!(
            StatusReport::decode(&switch(0x81, 0xFF)).unwrap(),
            StatusReport::Switch {
                state: Some(SwitchState::On),
                raw_state: 0xFF,
                triggered: Triggered::Local
            }
        );
    }

    #[test]
    fn test_switch_off_remote() {
        assert_eq!(
            StatusReport::decode(&switch(0x11, 0x00)).unwrap(),
            StatusReport::Switch {
                state: Some(SwitchState::Off),
                raw_state: 0x00,
                triggered: Triggered::Remote
            }
        );
    }

    #[test]
    fn test_switch_unrecognized_state() {
        match StatusReport::decode(&switch(0x81, 0x42)).unwrap() {
            StatusReport::Switch { state, raw_state, .. } => {
                assert_eq!(state, None);
                assert_eq!(raw_state, 0x42);
            }
            other => panic!("expected switch report, got {:?}", other),
        }
    }

    #[test]
    fn test_short_switch_report_has_unknown_trigger() {
        match StatusReport::decode(&[0x90, 0xFF]).unwrap() {
            StatusReport::Switch { state, triggered, .. } => {
                assert_eq!(state, Some(SwitchState::On));
                assert_eq!(triggered, Triggered::Unknown);
            }
            other => panic!("expected switch report, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated() {
        assert!(StatusReport::decode(&[0x90]).is_err());
    }
}
