//! Protocol types shared by the codec and the server

use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

/// Lower three bytes of the plug's MAC address.
///
/// Its lowercase hex form is the device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortMac(pub [u8; 3]);

impl ShortMac {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }

    /// Registry key for this plug
    pub fn device_id(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ShortMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for ShortMac {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Full 6-byte hardware address, learned from the first INIT2 reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullMac(pub [u8; 6]);

impl FullMac {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    /// The trailing three bytes, which equal the short MAC on a real plug
    pub fn short(&self) -> ShortMac {
        ShortMac([self.0[3], self.0[4], self.0[5]])
    }
}

impl fmt::Display for FullMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for FullMac {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Two-byte code the plug hands out in its INIT1 reply; every switch
/// command must echo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerCode(pub [u8; 2]);

impl TriggerCode {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    pub fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }
}

impl fmt::Display for TriggerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Firmware version reported in the second INIT2 reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Firmware {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

impl Firmware {
    pub fn new(major: u8, minor: u8, build: u8) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl Serialize for Firmware {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Relay state of a plug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    #[default]
    Unknown,
    On,
    Off,
}

impl SwitchState {
    /// Decode the trailing byte of a switch report or switch command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0xFF => Some(SwitchState::On),
            0x00 => Some(SwitchState::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::Unknown => "unknown",
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of the last state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Triggered {
    #[default]
    Unknown,
    /// Physical button on the plug
    Local,
    /// Switch command from a controller
    Remote,
}

impl Triggered {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x81 => Triggered::Local,
            0x11 => Triggered::Remote,
            _ => Triggered::Unknown,
        }
    }
}

impl fmt::Display for Triggered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Triggered::Unknown => "unknown",
            Triggered::Local => "local",
            Triggered::Remote => "remote",
        })
    }
}

/// Metric carried by an energy measurement report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnergyMetric {
    Power,
    Energy,
    Voltage,
    Current,
    Frequency,
    MaxPower,
    CosPhi,
    Unknown(u8),
}

impl EnergyMetric {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => EnergyMetric::Power,
            2 => EnergyMetric::Energy,
            3 => EnergyMetric::Voltage,
            4 => EnergyMetric::Current,
            5 => EnergyMetric::Frequency,
            7 => EnergyMetric::MaxPower,
            8 => EnergyMetric::CosPhi,
            other => EnergyMetric::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            EnergyMetric::Power => 1,
            EnergyMetric::Energy => 2,
            EnergyMetric::Voltage => 3,
            EnergyMetric::Current => 4,
            EnergyMetric::Frequency => 5,
            EnergyMetric::MaxPower => 7,
            EnergyMetric::CosPhi => 8,
            EnergyMetric::Unknown(code) => *code,
        }
    }

    /// Name used as the key in a device's energy map
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            EnergyMetric::Power => "power".into(),
            EnergyMetric::Energy => "energy".into(),
            EnergyMetric::Voltage => "voltage".into(),
            EnergyMetric::Current => "current".into(),
            EnergyMetric::Frequency => "frequency".into(),
            EnergyMetric::MaxPower => "maxpower".into(),
            EnergyMetric::CosPhi => "cosphi".into(),
            EnergyMetric::Unknown(code) => format!("unknowntype_type_{}", code).into(),
        }
    }

    /// Divisor applied to the raw 24-bit reading
    pub fn divisor(&self) -> f64 {
        match self {
            EnergyMetric::Energy => 1000.0,
            _ => 100.0,
        }
    }

    pub fn scale(&self, raw: u32) -> f64 {
        raw as f64 / self.divisor()
    }
}

impl fmt::Display for EnergyMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for EnergyMetric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}
