//! Device events
//!
//! Events are published on a `tokio::sync::broadcast` channel in the order
//! the server processed them. Subscribers that fall behind by more than the
//! channel capacity see `RecvError::Lagged` and skip ahead.

use ghoma_core::EnergyMetric;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::device::DeviceView;

/// Something happened to a device
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A plug completed the handshake for the first time
    New { device: DeviceView },
    /// The relay switched on or off
    StatusChanged { device: DeviceView },
    /// An energy reading was updated
    Measurement {
        device: DeviceView,
        metric: EnergyMetric,
    },
    /// A registered plug sent a heartbeat
    Heartbeat { device: DeviceView },
    /// The device's connection is gone and it left the registry
    Closed { device: DeviceView },
    /// A known plug reconnected and replaced its previous record
    Reregistered { device: DeviceView },
}

impl DeviceEvent {
    /// The device snapshot taken when the event was emitted
    pub fn device(&self) -> &DeviceView {
        match self {
            DeviceEvent::New { device }
            | DeviceEvent::StatusChanged { device }
            | DeviceEvent::Measurement { device, .. }
            | DeviceEvent::Heartbeat { device }
            | DeviceEvent::Closed { device }
            | DeviceEvent::Reregistered { device } => device,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceEvent::New { .. } => "new",
            DeviceEvent::StatusChanged { .. } => "status_changed",
            DeviceEvent::Measurement { .. } => "measurement",
            DeviceEvent::Heartbeat { .. } => "heartbeat",
            DeviceEvent::Closed { .. } => "closed",
            DeviceEvent::Reregistered { .. } => "reregistered",
        }
    }
}

/// Fan-out of device events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: DeviceEvent) {
        trace!("event {} for {}", event.kind(), event.device().id);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
