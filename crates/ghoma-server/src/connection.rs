//! Per-connection protocol handling
//!
//! One task per accepted socket. The task owns the receive accumulator and
//! the handshake; the only shared state it touches is the registry, through
//! [`ServerState`].

use ghoma_core::time::{self, Timestamp};
use ghoma_core::{Command, Frame, FrameDecoder, Message, StatusReport};
use ghoma_transport::{TransportError, TransportEvent, TransportReceiver, TransportSender};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::device::{ConnectionHandle, ConnectionId, DeviceRecord};
use crate::error::{Result, ServerError};
use crate::event::DeviceEvent;
use crate::handshake::{Handshake, HandshakeStep};
use crate::state::ServerState;

/// Protocol state of one plug connection
pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: Timestamp,
    sender: Arc<dyn TransportSender>,
    decoder: FrameDecoder,
    handshake: Handshake,
    /// Set once the device is in the registry
    device_id: Option<String>,
    state: Arc<ServerState>,
}

impl Connection {
    pub fn new(
        state: Arc<ServerState>,
        sender: Arc<dyn TransportSender>,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr,
            connected_at: time::now(),
            sender,
            decoder: FrameDecoder::with_max_buffer(state.config().max_frame_buffer),
            handshake: Handshake::new(),
            device_id: None,
            state,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Open the handshake
    pub async fn start(&self) -> Result<()> {
        self.send(Command::Init1).await
    }

    /// Queue a command without waiting on the write queue.
    ///
    /// A full queue drops the frame; the plug retries heartbeats and the
    /// handshake on its own. Any other write failure ends the connection.
    async fn send(&self, command: Command) -> Result<()> {
        let wire = command.encode()?;
        debug!(
            "SEND [{}] {} : {}",
            command.name(),
            self.remote_addr,
            hex::encode(&wire)
        );
        match self.sender.try_send(wire) {
            Ok(()) => Ok(()),
            Err(TransportError::BufferFull) => {
                warn!(
                    "Write queue full for {}, dropped {}",
                    self.remote_addr,
                    command.name()
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Feed received bytes and handle every frame they complete.
    ///
    /// An error means the byte stream is unusable and the connection must be
    /// torn down.
    pub async fn on_data(&mut self, data: &[u8]) -> Result<()> {
        self.decoder.extend(data);
        while let Some(frame) = self.decoder.next_frame()? {
            self.on_frame(&frame).await?;
        }
        Ok(())
    }

    async fn on_frame(&mut self, frame: &Frame) -> Result<()> {
        trace!("RECV {} : {:?}", self.remote_addr, frame);

        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed frame from {}: {}", self.remote_addr, e);
                return Ok(());
            }
        };

        match message {
            Message::Init1Reply { .. } | Message::Init2Reply { .. } => {
                self.on_handshake(&message).await
            }
            Message::Heartbeat => self.on_heartbeat().await,
            Message::Status(report) => {
                self.on_status(report);
                Ok(())
            }
            Message::Unknown { command } => {
                debug!(
                    "UNSUP CMD 0x{:02x} from {} : {}",
                    command,
                    self.remote_addr,
                    hex::encode(frame.payload())
                );
                Ok(())
            }
        }
    }

    async fn on_handshake(&mut self, message: &Message) -> Result<()> {
        debug!("HANDLE [{}] {}", message.name(), self.remote_addr);

        match self.handshake.handle(message) {
            HandshakeStep::SendInit2 => self.send(Command::Init2).await,
            HandshakeStep::AwaitSecondReply => Ok(()),
            HandshakeStep::Complete(identity) => {
                let handle = ConnectionHandle {
                    id: self.id,
                    sender: self.sender.clone(),
                    remote_addr: self.remote_addr,
                    connected_at: self.connected_at,
                };
                let device = self
                    .state
                    .register(DeviceRecord::new(&identity, handle))
                    .await;
                self.device_id = Some(device.id);
                Ok(())
            }
            HandshakeStep::Ignored => {
                debug!(
                    "Ignoring {} from {} in state {:?}",
                    message.name(),
                    self.remote_addr,
                    self.handshake.state()
                );
                Ok(())
            }
        }
    }

    /// Heartbeats are acknowledged even before registration
    async fn on_heartbeat(&mut self) -> Result<()> {
        if let Some(id) = self.device_id.as_deref() {
            let now = time::now();
            let touched = self.state.registry().update(id, self.id, |record| {
                record.touch(now);
                record.view()
            });
            if let Some(device) = touched {
                trace!("HEARTBEAT {}", device.id);
                self.state.events().emit(DeviceEvent::Heartbeat { device });
            }
        }

        self.send(Command::HeartbeatReply).await
    }

    fn on_status(&mut self, report: StatusReport) {
        let Some(id) = self.device_id.as_deref() else {
            debug!("Status before registration from {}", self.remote_addr);
            return;
        };
        let now = time::now();
        let registry = self.state.registry();

        match report {
            StatusReport::Measurement { metric, value, .. } => {
                let updated = registry.update(id, self.id, |record| {
                    record.apply_measurement(metric, value, now);
                    record.view()
                });
                if let Some(device) = updated {
                    debug!("MEASURE {} {}={}", id, metric, value);
                    self.state
                        .events()
                        .emit(DeviceEvent::Measurement { device, metric });
                }
            }
            StatusReport::Switch {
                state,
                raw_state,
                triggered,
            } => {
                if state.is_none() {
                    warn!("Status unknown from {}: 0x{:02x}", id, raw_state);
                    return;
                }
                let changed = registry
                    .update(id, self.id, |record| {
                        record
                            .apply_switch(state, triggered, now)
                            .then(|| record.view())
                    })
                    .flatten();
                if let Some(device) = changed {
                    info!("STATUS {} {} ({})", id, device.state, device.triggered);
                    self.state
                        .events()
                        .emit(DeviceEvent::StatusChanged { device });
                }
            }
        }
    }
}

/// Drive one accepted connection until it closes, then tear it down.
pub async fn run_connection<R>(
    state: Arc<ServerState>,
    sender: Arc<dyn TransportSender>,
    mut receiver: R,
    remote_addr: SocketAddr,
) where
    R: TransportReceiver,
{
    let mut connection = Connection::new(state.clone(), sender.clone(), remote_addr);
    let mut shutdown = state.shutdown_signal();
    let handshake_deadline = tokio::time::sleep(state.config().handshake_timeout());
    tokio::pin!(handshake_deadline);

    let reason = if *shutdown.borrow() {
        "server shutting down".to_string()
    } else if let Err(e) = connection.start().await {
        format!("failed to send INIT1: {}", e)
    } else {
        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(TransportEvent::Data(data)) => {
                        if let Err(e) = connection.on_data(&data).await {
                            error!("Protocol error from {}: {}", remote_addr, e);
                            break format!("protocol error: {}", e);
                        }
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        break reason.unwrap_or_else(|| "closed by peer".to_string());
                    }
                    Some(TransportEvent::Error(e)) => {
                        error!("Transport error from {}: {}", remote_addr, e);
                        break format!("transport error: {}", e);
                    }
                    Some(TransportEvent::Connected) => {}
                    None => break "transport closed".to_string(),
                },
                _ = &mut handshake_deadline, if !connection.handshake().is_registered() => {
                    warn!(
                        "Handshake with {} timed out in state {:?}",
                        remote_addr,
                        connection.handshake().state()
                    );
                    let timeout = state.config().handshake_timeout();
                    break ServerError::HandshakeTimeout(timeout).to_string();
                }
                _ = shutdown.changed() => break "server shutting down".to_string(),
            }
        }
    };

    if !state.close_connection(connection.id(), &reason).await {
        info!("CLOSED {} ({})", remote_addr, reason);
    }
    // No-op if the teardown above already closed it
    let _ = sender.close().await;
}
