//! Shared server state
//!
//! Everything a connection task or the heartbeat monitor needs: the config,
//! the device registry, the event bus and the shutdown signal. Every way a
//! device can leave the registry ends in [`ServerState::close_device`].

use ghoma_core::time::Timestamp;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::device::{ConnectionId, DeviceRecord, DeviceView};
use crate::event::{DeviceEvent, EventBus};
use crate::registry::{DeviceRegistry, Registration};

/// State shared by all tasks of one control server
pub struct ServerState {
    config: ServerConfig,
    registry: DeviceRegistry,
    events: EventBus,
    shutdown: watch::Sender<bool>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            registry: DeviceRegistry::new(),
            events,
            shutdown,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Insert a freshly handshaken device and announce it.
    ///
    /// A reconnect closes the previous record's connection and announces the
    /// replacement instead of a new device.
    pub async fn register(&self, record: DeviceRecord) -> DeviceView {
        match self.registry.insert(record) {
            Registration::New(device) => {
                info!(
                    "REGISTER {} firmware {} from {}",
                    device.id, device.firmware, device.remote_addr
                );
                self.events.emit(DeviceEvent::New {
                    device: device.clone(),
                });
                device
            }
            Registration::Replaced { device, previous } => {
                info!(
                    "REREG {} from {} (count {})",
                    device.id, device.remote_addr, device.reregistered_count
                );
                self.close_device(previous, "replaced by reconnect").await;
                self.events.emit(DeviceEvent::Reregistered {
                    device: device.clone(),
                });
                device
            }
        }
    }

    /// Announce a device that has left the registry and close its socket
    pub async fn close_device(&self, record: DeviceRecord, reason: &str) {
        info!(
            "CLOSED {} ({}): {}",
            record.id(),
            record.connection().remote_addr,
            reason
        );
        self.events.emit(DeviceEvent::Closed {
            device: record.view(),
        });
        if let Err(e) = record.connection().sender.close().await {
            warn!("Error closing connection of {}: {}", record.id(), e);
        }
    }

    /// Tear down whatever device `connection` owns.
    ///
    /// Returns `false` if the connection owns no registered device, which is
    /// the case before the handshake completes, after a reconnect replaced
    /// it, or when it was already closed.
    pub async fn close_connection(&self, connection: ConnectionId, reason: &str) -> bool {
        match self.registry.remove_by_connection(connection) {
            Some(record) => {
                self.close_device(record, reason).await;
                true
            }
            None => {
                debug!("Connection {} owns no registered device", connection);
                false
            }
        }
    }

    /// Close every device whose heartbeat is older than the configured
    /// timeout. Returns the number evicted.
    pub async fn evict_stale(&self, now: Timestamp) -> usize {
        let stale = self
            .registry
            .remove_stale(now, self.config.heartbeat_timeout());
        let count = stale.len();
        for record in stale {
            warn!(
                "TIMEOUT no heartbeat from [{}] in {:?}",
                record.id(),
                ghoma_core::time::elapsed(record.last_heartbeat(), now)
            );
            self.close_device(record, "heartbeat timeout").await;
        }
        count
    }

    /// Close every registered device
    pub async fn close_all(&self, reason: &str) -> usize {
        let records = self.registry.drain();
        let count = records.len();
        for record in records {
            self.close_device(record, reason).await;
        }
        count
    }

    /// Flip the shutdown flag. Returns `false` if it was already set.
    pub fn begin_shutdown(&self) -> bool {
        self.shutdown.send_if_modified(|stopping| {
            if *stopping {
                false
            } else {
                *stopping = true;
                true
            }
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once shutdown begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
