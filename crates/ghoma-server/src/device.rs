//! Device records and read-only views

use ghoma_core::time::{self, Timestamp};
use ghoma_core::{
    Command, EnergyMetric, FullMac, Firmware, ShortMac, SwitchState, TriggerCode, Triggered,
};
use ghoma_transport::TransportSender;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::handshake::DeviceIdentity;

/// Identifies one accepted transport connection.
///
/// A device keeps its id across reconnects; the connection id is what tells
/// an old socket from its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owned link from a device record to its connection
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: Arc<dyn TransportSender>,
    pub remote_addr: SocketAddr,
    /// When the socket was accepted
    pub connected_at: Timestamp,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("connected", &self.sender.is_connected())
            .finish()
    }
}

/// Latest reading of one energy metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyReading {
    pub value: f64,
    /// Value before the latest update
    pub prev_value: Option<f64>,
    /// Number of readings received since registration
    pub count: u64,
    pub updated_at: Timestamp,
}

/// Server-side state of a registered plug
#[derive(Debug)]
pub struct DeviceRecord {
    id: String,
    short_mac: ShortMac,
    full_mac: Option<FullMac>,
    trigger_code: TriggerCode,
    firmware: Firmware,
    state: SwitchState,
    prev_state: Option<SwitchState>,
    state_changed_at: Option<Timestamp>,
    triggered: Triggered,
    energy: BTreeMap<EnergyMetric, EnergyReading>,
    last_heartbeat: Timestamp,
    initialized_at: Timestamp,
    reregistered_count: u32,
    connection: ConnectionHandle,
}

impl DeviceRecord {
    /// Build a record from a completed handshake
    pub fn new(identity: &DeviceIdentity, connection: ConnectionHandle) -> Self {
        Self {
            id: identity.short_mac.device_id(),
            short_mac: identity.short_mac,
            full_mac: identity.full_mac,
            trigger_code: identity.trigger_code,
            firmware: identity.firmware,
            state: SwitchState::Unknown,
            prev_state: None,
            state_changed_at: None,
            triggered: Triggered::Unknown,
            energy: BTreeMap::new(),
            last_heartbeat: connection.connected_at,
            initialized_at: connection.connected_at,
            reregistered_count: 0,
            connection,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    pub fn last_heartbeat(&self) -> Timestamp {
        self.last_heartbeat
    }

    pub fn reregistered_count(&self) -> u32 {
        self.reregistered_count
    }

    pub(crate) fn set_reregistered_count(&mut self, count: u32) {
        self.reregistered_count = count;
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id
    }

    /// Record a heartbeat
    pub fn touch(&mut self, now: Timestamp) {
        self.last_heartbeat = now;
    }

    /// Whether no heartbeat arrived within `timeout` before `now`
    pub fn is_stale(&self, now: Timestamp, timeout: std::time::Duration) -> bool {
        time::elapsed(self.last_heartbeat, now) > timeout
    }

    /// Apply a switch report. Returns `true` if the state changed.
    ///
    /// Unrecognized state bytes arrive as `None` and never change anything,
    /// nor does a report repeating the current state.
    pub fn apply_switch(
        &mut self,
        state: Option<SwitchState>,
        triggered: Triggered,
        now: Timestamp,
    ) -> bool {
        let Some(new_state) = state else {
            return false;
        };
        if new_state == SwitchState::Unknown || new_state == self.state {
            return false;
        }

        self.prev_state = Some(self.state);
        self.state = new_state;
        self.state_changed_at = Some(now);
        self.triggered = triggered;
        true
    }

    /// Apply an energy reading and return the updated entry
    pub fn apply_measurement(
        &mut self,
        metric: EnergyMetric,
        value: f64,
        now: Timestamp,
    ) -> EnergyReading {
        let reading = self.energy.entry(metric).or_insert(EnergyReading {
            value,
            prev_value: None,
            count: 0,
            updated_at: now,
        });

        if reading.count > 0 {
            reading.prev_value = Some(reading.value);
        }
        reading.value = value;
        reading.count += 1;
        reading.updated_at = now;
        *reading
    }

    /// Switch command addressed to this plug
    pub fn switch_command(&self, state: SwitchState) -> Command {
        Command::switch(self.trigger_code, self.short_mac, state)
    }

    /// Read-only projection without the connection handle
    pub fn view(&self) -> DeviceView {
        DeviceView {
            id: self.id.clone(),
            short_mac: self.short_mac,
            full_mac: self.full_mac,
            firmware: self.firmware,
            state: self.state,
            prev_state: self.prev_state,
            state_changed_at: self.state_changed_at,
            triggered: self.triggered,
            energy: self.energy.clone(),
            last_heartbeat: self.last_heartbeat,
            initialized_at: self.initialized_at,
            reregistered_count: self.reregistered_count,
            remote_addr: self.connection.remote_addr,
        }
    }
}

/// Snapshot of a device handed to callers and event subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub short_mac: ShortMac,
    pub full_mac: Option<FullMac>,
    pub firmware: Firmware,
    pub state: SwitchState,
    pub prev_state: Option<SwitchState>,
    pub state_changed_at: Option<Timestamp>,
    pub triggered: Triggered,
    pub energy: BTreeMap<EnergyMetric, EnergyReading>,
    pub last_heartbeat: Timestamp,
    pub initialized_at: Timestamp,
    pub reregistered_count: u32,
    pub remote_addr: SocketAddr,
}

impl DeviceView {
    pub fn energy(&self, metric: EnergyMetric) -> Option<&EnergyReading> {
        self.energy.get(&metric)
    }

    pub fn is_on(&self) -> bool {
        self.state == SwitchState::On
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{handle, identity};

    fn record() -> DeviceRecord {
        let (conn, _sender) = handle();
        DeviceRecord::new(&identity([0x11, 0x22, 0x33]), conn)
    }

    #[test]
    fn test_new_record_identity() {
        let record = record();
        assert_eq!(record.id(), "112233");
        assert_eq!(record.state(), SwitchState::Unknown);
        assert_eq!(record.reregistered_count(), 0);
        assert_eq!(record.last_heartbeat(), record.connection().connected_at);

        let view = record.view();
        assert_eq!(view.firmware, Firmware::new(1, 0, 6));
        assert!(view.energy.is_empty());
        assert_eq!(view.prev_state, None);
    }

    #[test]
    fn test_switch_changes_once() {
        let mut record = record();

        assert!(record.apply_switch(Some(SwitchState::On), Triggered::Local, 10));
        assert!(!record.apply_switch(Some(SwitchState::On), Triggered::Remote, 20));

        let view = record.view();
        assert_eq!(view.state, SwitchState::On);
        assert_eq!(view.prev_state, Some(SwitchState::Unknown));
        assert_eq!(view.triggered, Triggered::Local);
        assert_eq!(view.state_changed_at, Some(10));

        assert!(record.apply_switch(Some(SwitchState::Off), Triggered::Remote, 30));
        let view = record.view();
        assert_eq!(view.prev_state, Some(SwitchState::On));
        assert_eq!(view.triggered, Triggered::Remote);
    }

    #[test]
    fn test_unrecognized_switch_byte_is_ignored() {
        let mut record = record();
        assert!(!record.apply_switch(None, Triggered::Local, 10));
        assert_eq!(record.state(), SwitchState::Unknown);
        assert_eq!(record.view().state_changed_at, None);
    }

    #[test]
    fn test_measurement_tracks_previous_value() {
        let mut record = record();

        let first = record.apply_measurement(EnergyMetric::Power, 50.0, 100);
        assert_eq!(first.count, 1);
        assert_eq!(first.prev_value, None);

        let second = record.apply_measurement(EnergyMetric::Power, 42.5, 200);
        assert_eq!(second.count, 2);
        assert_eq!(second.prev_value, Some(50.0));
        assert_eq!(second.value, 42.5);
        assert_eq!(second.updated_at, 200);

        record.apply_measurement(EnergyMetric::Energy, 12.345, 300);
        let view = record.view();
        assert_eq!(view.energy.len(), 2);
        assert_eq!(view.energy(EnergyMetric::Energy).map(|r| r.value), Some(12.345));
    }

    #[test]
    fn test_staleness() {
        let mut record = record();
        record.touch(1_000_000);
        let timeout = std::time::Duration::from_secs(5);
        assert!(!record.is_stale(6_000_000, timeout));
        assert!(record.is_stale(6_000_001, timeout));
    }

    #[test]
    fn test_view_serializes_with_metric_names() {
        let mut record = record();
        record.apply_measurement(EnergyMetric::Voltage, 230.12, 5);
        let json = serde_json::to_value(record.view()).unwrap();
        assert_eq!(json["id"], "112233");
        assert_eq!(json["state"], "unknown");
        assert_eq!(json["firmware"], "1.0.6");
        assert_eq!(json["energy"]["voltage"]["count"], 1);
    }
}
