//! Common test helpers and utilities for G-Homa tests
//!
//! This crate provides robust test utilities including:
//! - Condition-based waiting (no hardcoded sleeps)
//! - Proper resource cleanup with RAII
//! - Test server management
//! - A simulated plug speaking the device side of the protocol
//! - Event collectors for verifying what the server announced

use bytes::Bytes;
use ghoma_core::{
    frame, EnergyMetric, Firmware, FrameDecoder, ShortMac, SwitchState, TriggerCode,
};
use ghoma_server::{ControlServer, DeviceEvent, ServerConfig};
use ghoma_transport::{
    TcpReceiver, TcpSender, TcpTransport, TransportEvent, TransportReceiver, TransportSender,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

pub type TestError = Box<dyn std::error::Error + Send + Sync>;
pub type TestResult<T> = Result<T, TestError>;

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait with notification - more efficient than polling
pub async fn wait_with_notify(notify: &Notify, max_wait: Duration) -> bool {
    timeout(max_wait, notify.notified()).await.is_ok()
}

// ============================================================================
// Device-side payloads
// ============================================================================

/// Payloads a plug sends, laid out like real captures
pub mod payloads {
    use super::*;

    pub fn init1_reply(trigger: TriggerCode, mac: ShortMac) -> Vec<u8> {
        let mut p = vec![0x03, 0x01, 0x0A, 0xC0];
        p.extend_from_slice(trigger.as_bytes());
        p.extend_from_slice(mac.as_bytes());
        p.extend_from_slice(&[0x01, 0x06]);
        p
    }

    /// First INIT2 reply: tail is the full MAC, ending in the short MAC
    pub fn init2_first(vendor: [u8; 3], mac: ShortMac) -> Vec<u8> {
        let mut p = vec![0x07, 0x01, 0x0A, 0xC0, 0x32, 0x23, 0x00, 0x01];
        p.extend_from_slice(&vendor);
        p.extend_from_slice(mac.as_bytes());
        p
    }

    /// Second INIT2 reply: tail ends in the firmware version
    pub fn init2_second(firmware: Firmware) -> Vec<u8> {
        vec![
            0x07, 0x01, 0x0A, 0xC0, 0x32, 0x23, 0x00, 0x02, 0x00, 0x00, 0x00,
            firmware.major, firmware.minor, firmware.build,
        ]
    }

    pub fn heartbeat() -> Vec<u8> {
        vec![0x04, 0x01, 0x0A, 0xC0]
    }

    /// Switch report with an explicit origin byte (0x81 local, 0x11 remote)
    pub fn switch_report(trigger: TriggerCode, mac: ShortMac, origin: u8, state: u8) -> Vec<u8> {
        let mut p = vec![0x90, 0x01, 0x0A, 0xE0];
        p.extend_from_slice(trigger.as_bytes());
        p.extend_from_slice(mac.as_bytes());
        p.extend_from_slice(&[0xFF, 0xFE, 0x01, origin, 0x11, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
        p.push(state);
        p
    }

    pub fn measurement(trigger: TriggerCode, mac: ShortMac, metric: u8, raw: u32) -> Vec<u8> {
        let mut p = vec![0x90, 0x01, 0x0A, 0xE0];
        p.extend_from_slice(trigger.as_bytes());
        p.extend_from_slice(mac.as_bytes());
        p.extend_from_slice(&[0xFF, 0xFE, 0x01, 0x81, 0x39, 0x00, 0x00, 0x01]);
        p.push(metric);
        p.push(0x20);
        p.extend_from_slice(&raw.to_be_bytes()[1..]);
        p
    }
}

// ============================================================================
// Simulated Plug
// ============================================================================

/// A fake plug connected to a server over TCP
pub struct SimulatedPlug {
    sender: TcpSender,
    receiver: TcpReceiver,
    decoder: FrameDecoder,
    pub short_mac: ShortMac,
    pub trigger_code: TriggerCode,
    pub firmware: Firmware,
    closed: bool,
}

impl SimulatedPlug {
    /// Open a TCP connection to `addr` without handshaking
    pub async fn connect(addr: &str, mac: [u8; 3]) -> TestResult<Self> {
        let (sender, receiver) = TcpTransport::new().connect(addr).await?;
        Ok(Self {
            sender,
            receiver,
            decoder: FrameDecoder::new(),
            short_mac: ShortMac(mac),
            trigger_code: TriggerCode([0x32, 0x23]),
            firmware: Firmware::new(1, 0, 6),
            closed: false,
        })
    }

    pub fn with_firmware(mut self, firmware: Firmware) -> Self {
        self.firmware = firmware;
        self
    }

    pub fn device_id(&self) -> String {
        self.short_mac.device_id()
    }

    /// Frame and send a payload
    pub async fn send_payload(&self, payload: &[u8]) -> TestResult<()> {
        self.sender.send(frame::encode(payload)?).await?;
        Ok(())
    }

    /// Send bytes without framing
    pub async fn send_raw(&self, data: &[u8]) -> TestResult<()> {
        self.sender.send(Bytes::copy_from_slice(data)).await?;
        Ok(())
    }

    /// Next frame payload from the server, or `None` on timeout or close
    pub async fn recv_payload(&mut self, max_wait: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => return Some(frame.payload().to_vec()),
                Ok(None) => {}
                Err(_) => return None,
            }
            if self.closed {
                return None;
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Data(data))) => self.decoder.extend(&data),
                Ok(Some(TransportEvent::Disconnected { .. })) | Ok(None) => self.closed = true,
                Ok(Some(TransportEvent::Error(_))) => self.closed = true,
                Ok(Some(TransportEvent::Connected)) => {}
                Err(_) => return None,
            }
        }
    }

    /// Receive a frame and check its payload
    pub async fn expect_payload(&mut self, expected: &[u8]) -> TestResult<()> {
        match self.recv_payload(DEFAULT_TIMEOUT).await {
            Some(payload) if payload == expected => Ok(()),
            Some(payload) => Err(format!("expected {:02x?}, got {:02x?}", expected, payload).into()),
            None => Err(format!("expected {:02x?}, got nothing", expected).into()),
        }
    }

    /// Answer INIT1 and INIT2 like a real plug
    pub async fn handshake(&mut self) -> TestResult<()> {
        self.expect_payload(&[0x02, 0x05, 0x0D, 0x07, 0x05, 0x07, 0x12]).await?;
        self.expect_payload(&[0x02]).await?;
        self.send_payload(&payloads::init1_reply(self.trigger_code, self.short_mac))
            .await?;

        self.expect_payload(&[0x05, 0x01]).await?;
        self.send_payload(&payloads::init2_first([0xAC, 0xCF, 0x23], self.short_mac))
            .await?;
        self.send_payload(&payloads::init2_second(self.firmware)).await?;
        Ok(())
    }

    pub async fn send_heartbeat(&self) -> TestResult<()> {
        self.send_payload(&payloads::heartbeat()).await
    }

    /// Send a heartbeat and wait for the acknowledgement
    pub async fn heartbeat(&mut self) -> TestResult<()> {
        self.send_heartbeat().await?;
        self.expect_payload(&[0x06]).await
    }

    /// Report a relay change; `local` picks the origin byte
    pub async fn report_switch(&self, state: SwitchState, local: bool) -> TestResult<()> {
        let origin = if local { 0x81 } else { 0x11 };
        let byte = match state {
            SwitchState::On => 0xFF,
            SwitchState::Off => 0x00,
            SwitchState::Unknown => 0x42,
        };
        self.send_payload(&payloads::switch_report(
            self.trigger_code,
            self.short_mac,
            origin,
            byte,
        ))
        .await
    }

    pub async fn report_measurement(&self, metric: EnergyMetric, raw: u32) -> TestResult<()> {
        self.send_payload(&payloads::measurement(
            self.trigger_code,
            self.short_mac,
            metric.code(),
            raw,
        ))
        .await
    }

    /// Wait until the server closes the connection, discarding data
    pub async fn wait_closed(&mut self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        while !self.closed {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            match timeout(remaining, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Data(_))) | Ok(Some(TransportEvent::Connected)) => {}
                Ok(_) => self.closed = true,
                Err(_) => return false,
            }
        }
        true
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}

// ============================================================================
// Test Server - RAII wrapper with proper cleanup
// ============================================================================

/// A control server on a free port that stops on drop
pub struct TestServer {
    port: u16,
    server: Arc<ControlServer>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a test server with default configuration
    pub async fn start() -> Self {
        Self::start_with_config(ServerConfig::default()).await
    }

    /// Start a test server; bind address and port are overridden
    pub async fn start_with_config(mut config: ServerConfig) -> Self {
        let port = find_available_port().await;
        config.bind = "127.0.0.1".to_string();
        config.port = port;

        let server = Arc::new(ControlServer::new(config));
        let runner = server.clone();
        let handle = tokio::spawn(async move {
            let _ = runner.start().await;
        });

        // Verify the port is listening
        let _ = wait_for(
            || async move {
                tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(5),
        )
        .await;

        Self {
            port,
            server,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn server(&self) -> &Arc<ControlServer> {
        &self.server
    }

    /// Connect a plug without handshaking
    pub async fn connect_plug(&self, mac: [u8; 3]) -> TestResult<SimulatedPlug> {
        SimulatedPlug::connect(&self.addr(), mac).await
    }

    /// Connect a plug, handshake and wait until the server has registered it
    pub async fn register_plug(&self, mac: [u8; 3]) -> TestResult<SimulatedPlug> {
        let mut plug = self.connect_plug(mac).await?;
        let before = self
            .server
            .get(&plug.device_id())
            .map(|d| d.reregistered_count);
        plug.handshake().await?;

        let id = plug.device_id();
        let server = self.server.clone();
        let registered = wait_for(
            || {
                let server = server.clone();
                let id = id.clone();
                async move {
                    match (server.get(&id), before) {
                        (Some(device), Some(count)) => device.reregistered_count > count,
                        (Some(_), None) => true,
                        (None, _) => false,
                    }
                }
            },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await;

        if registered {
            Ok(plug)
        } else {
            Err(format!("plug {} was not registered", id).into())
        }
    }

    /// Shut the server down and wait for the accept loop to finish
    pub async fn shutdown(&mut self) {
        self.server.shutdown().await;
        if let Some(handle) = self.handle.take() {
            let _ = timeout(Duration::from_secs(5), handle).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Event Collector - for verifying emitted events
// ============================================================================

/// Records every event a server publishes
pub struct EventCollector {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
    count: Arc<AtomicU32>,
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl EventCollector {
    pub fn start(server: &ControlServer) -> Self {
        Self::from_receiver(server.subscribe())
    }

    pub fn from_receiver(mut rx: broadcast::Receiver<DeviceEvent>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicU32::new(0));
        let notify = Arc::new(Notify::new());

        let task = {
            let events = events.clone();
            let count = count.clone();
            let notify = notify.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            events.lock().push(event);
                            count.fetch_add(1, Ordering::SeqCst);
                            notify.notify_waiters();
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        Self {
            events,
            count,
            notify,
            task,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    /// Event kinds in arrival order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(DeviceEvent::kind).collect()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Wait for at least n events
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// Wait until an event of `kind` has been seen, returning the latest one
    pub async fn wait_for_kind(&self, kind: &str, max_wait: Duration) -> Option<DeviceEvent> {
        let deadline = Instant::now() + max_wait;
        loop {
            let found = self
                .events
                .lock()
                .iter()
                .rev()
                .find(|e| e.kind() == kind)
                .cloned();
            if found.is_some() {
                return found;
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            // Wake on the next event or re-check after a short interval
            let _ = wait_with_notify(&self.notify, remaining.min(DEFAULT_CHECK_INTERVAL)).await;
        }
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

impl Drop for EventCollector {
    fn drop(&mut self) {
        self.task.abort();
    }
}
