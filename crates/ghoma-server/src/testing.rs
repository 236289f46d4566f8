//! Fixtures shared by the unit tests

use async_trait::async_trait;
use bytes::Bytes;
use ghoma_core::time::{self, Timestamp};
use ghoma_core::{Firmware, ShortMac, TriggerCode};
use ghoma_transport::{Result as TransportResult, TransportError, TransportSender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::device::{ConnectionHandle, ConnectionId, DeviceRecord, DeviceView};
use crate::handshake::DeviceIdentity;

/// Sender that records everything written to it
#[derive(Default)]
pub(crate) struct RecordingSender {
    sent: Mutex<Vec<Bytes>>,
    closed: Mutex<bool>,
    closes: AtomicUsize,
    /// Reject writes as if the write queue were full
    full: AtomicBool,
}

impl RecordingSender {
    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportSender for RecordingSender {
    async fn send(&self, data: Bytes) -> TransportResult<()> {
        self.try_send(data)
    }

    fn try_send(&self, data: Bytes) -> TransportResult<()> {
        if *self.closed.lock() {
            return Err(TransportError::NotConnected);
        }
        if self.full.load(Ordering::SeqCst) {
            return Err(TransportError::BufferFull);
        }
        self.sent.lock().push(data);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !*self.closed.lock()
    }

    async fn close(&self) -> TransportResult<()> {
        *self.closed.lock() = true;
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn identity(mac: [u8; 3]) -> DeviceIdentity {
    DeviceIdentity {
        short_mac: ShortMac(mac),
        trigger_code: TriggerCode([0x32, 0x23]),
        full_mac: None,
        firmware: Firmware::new(1, 0, 6),
    }
}

pub(crate) fn handle_at(connected_at: Timestamp) -> (ConnectionHandle, Arc<RecordingSender>) {
    let sender = Arc::new(RecordingSender::default());
    let handle = ConnectionHandle {
        id: ConnectionId::new(),
        sender: sender.clone(),
        remote_addr: "127.0.0.1:50000".parse().unwrap(),
        connected_at,
    };
    (handle, sender)
}

pub(crate) fn handle() -> (ConnectionHandle, Arc<RecordingSender>) {
    handle_at(time::now())
}

pub(crate) fn record_at(mac: [u8; 3], connected_at: Timestamp) -> (DeviceRecord, Arc<RecordingSender>) {
    let (handle, sender) = handle_at(connected_at);
    (DeviceRecord::new(&identity(mac), handle), sender)
}

pub(crate) fn record(mac: [u8; 3]) -> (DeviceRecord, Arc<RecordingSender>) {
    record_at(mac, time::now())
}

/// View of a fresh record whose id is the given 6-digit hex string
pub(crate) fn view(id: &str) -> DeviceView {
    let bytes = hex::decode(id).unwrap();
    record([bytes[0], bytes[1], bytes[2]]).0.view()
}
