//! Device registry
//!
//! Process-wide store of registered plugs keyed by device id. All access goes
//! through one `RwLock`; closures passed to [`DeviceRegistry::for_each`] and
//! [`DeviceRegistry::update`] run under it and must not block.

use async_trait::async_trait;
use ghoma_core::time::Timestamp;
use ghoma_core::SwitchState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::device::{ConnectionId, DeviceRecord, DeviceView};
use crate::error::{Result, ServerError};

/// Outcome of [`DeviceRegistry::insert`], carrying the inserted device
#[derive(Debug)]
pub enum Registration {
    /// First record under this id
    New(DeviceView),
    /// A record with the same id was replaced; it is handed back so its
    /// connection can be closed
    Replaced {
        device: DeviceView,
        previous: DeviceRecord,
    },
}

impl Registration {
    pub fn device(&self) -> &DeviceView {
        match self {
            Registration::New(device) | Registration::Replaced { device, .. } => device,
        }
    }
}

/// Registered devices, keyed by id
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any record with the same id.
    ///
    /// On replacement the new record's reregistration count continues from
    /// the old one.
    pub fn insert(&self, mut record: DeviceRecord) -> Registration {
        let mut devices = self.devices.write();
        if let Some(previous) = devices.get(record.id()) {
            record.set_reregistered_count(previous.reregistered_count() + 1);
        }

        let device = record.view();
        match devices.insert(record.id().to_string(), record) {
            Some(previous) => Registration::Replaced { device, previous },
            None => Registration::New(device),
        }
    }

    pub fn get(&self, id: &str) -> Option<DeviceView> {
        self.devices.read().get(id).map(DeviceRecord::view)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    /// Remove the record owned by `connection`, if it is still registered.
    ///
    /// A record that was already replaced by a newer connection is left
    /// alone, so closing a stale socket never evicts its successor.
    pub fn remove_by_connection(&self, connection: ConnectionId) -> Option<DeviceRecord> {
        let mut devices = self.devices.write();
        let id = devices
            .iter()
            .find(|(_, record)| record.connection_id() == connection)
            .map(|(id, _)| id.clone())?;
        devices.remove(&id)
    }

    /// Visit every device under the read lock
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&DeviceView),
    {
        for record in self.devices.read().values() {
            visitor(&record.view());
        }
    }

    /// Snapshot of all devices, sorted by id
    pub fn devices(&self) -> Vec<DeviceView> {
        let mut views: Vec<DeviceView> = self
            .devices
            .read()
            .values()
            .map(DeviceRecord::view)
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Mutate the record `id` if `connection` still owns it.
    pub fn update<F, T>(&self, id: &str, connection: ConnectionId, f: F) -> Option<T>
    where
        F: FnOnce(&mut DeviceRecord) -> T,
    {
        let mut devices = self.devices.write();
        let record = devices.get_mut(id)?;
        if record.connection_id() != connection {
            debug!("Ignoring update for {} from superseded connection {}", id, connection);
            return None;
        }
        Some(f(record))
    }

    /// Remove every record whose last heartbeat is older than `timeout`.
    pub fn remove_stale(&self, now: Timestamp, timeout: Duration) -> Vec<DeviceRecord> {
        let mut devices = self.devices.write();
        let stale: Vec<String> = devices
            .iter()
            .filter(|(_, record)| record.is_stale(now, timeout))
            .map(|(id, _)| id.clone())
            .collect();

        stale.iter().filter_map(|id| devices.remove(id)).collect()
    }

    /// Remove and return every record
    pub fn drain(&self) -> Vec<DeviceRecord> {
        self.devices.write().drain().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Queue a switch command without waiting for room in the write queue.
    ///
    /// A plug that stopped reading yields `TransportError::BufferFull`.
    fn send_switch(&self, id: &str, state: SwitchState) -> Result<()> {
        let (command, sender) = {
            let devices = self.devices.read();
            let record = devices
                .get(id)
                .ok_or_else(|| ServerError::DeviceNotFound(id.to_string()))?;
            (record.switch_command(state), record.connection().sender.clone())
        };

        let wire = command.encode()?;
        debug!("SEND [{}] {} : {}", command.name(), id, hex::encode(&wire));
        sender.try_send(wire)?;
        Ok(())
    }
}

/// Actions on registered devices, addressed by id
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Queue an ON command for the device
    async fn switch_on(&self, id: &str) -> Result<()>;

    /// Queue an OFF command for the device
    async fn switch_off(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl DeviceControl for DeviceRegistry {
    async fn switch_on(&self, id: &str) -> Result<()> {
        self.send_switch(id, SwitchState::On)
    }

    async fn switch_off(&self, id: &str) -> Result<()> {
        self.send_switch(id, SwitchState::Off)
    }
}
