//! TCP transport implementation
//!
//! Plugs open a plain TCP connection to the server and exchange framed
//! binary messages. This layer does no framing of its own: every read is
//! forwarded as a `TransportEvent::Data` chunk, and every queued `Bytes` is
//! written as-is.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 64;

/// TCP configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Disable Nagle's algorithm; plug frames are tiny
    pub nodelay: bool,
    /// Queued events/writes per connection
    pub channel_buffer_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            keepalive_secs: 60,
            nodelay: true,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
        }
    }
}

/// State shared between a connection's sender and its IO task
struct LinkState {
    connected: Mutex<bool>,
    shutdown: Notify,
}

fn configure_stream(stream: &TcpStream, config: &TcpConfig) {
    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
    }

    if config.keepalive_secs > 0 {
        let socket = socket2::SockRef::from(stream);
        let keepalive =
            socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.keepalive_secs));
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to enable TCP keepalive: {}", e);
        }
    }
}

/// Split a stream into a sender/receiver pair backed by a spawned IO task
fn spawn_link(stream: TcpStream, config: &TcpConfig) -> (TcpSender, TcpReceiver) {
    let state = Arc::new(LinkState {
        connected: Mutex::new(true),
        shutdown: Notify::new(),
    });

    let capacity = config.channel_buffer_size.max(1);
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(capacity);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(capacity);

    let read_buffer_size = config.read_buffer_size.max(64);
    let loop_state = state.clone();

    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        run_tcp_io_loop(
            reader,
            writer,
            outgoing_rx,
            incoming_tx,
            read_buffer_size,
            loop_state,
        )
        .await;
    });

    (
        TcpSender {
            tx: outgoing_tx,
            state,
        },
        TcpReceiver { rx: incoming_rx },
    )
}

/// Shared IO loop for TCP connections
async fn run_tcp_io_loop(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<Bytes>,
    incoming_tx: mpsc::Sender<TransportEvent>,
    read_buffer_size: usize,
    state: Arc<LinkState>,
) {
    let mut read_buf = BytesMut::with_capacity(read_buffer_size);

    loop {
        if read_buf.capacity() < read_buffer_size {
            read_buf.reserve(read_buffer_size);
        }

        tokio::select! {
            // Flush queued writes before honouring a local close
            biased;

            Some(data) = outgoing_rx.recv() => {
                if let Err(e) = writer.write_all(&data).await {
                    error!("TCP write error: {}", e);
                    let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }

            _ = state.shutdown.notified() => {
                debug!("TCP connection closed locally");
                let _ = writer.shutdown().await;
                let _ = incoming_tx.send(TransportEvent::Disconnected {
                    reason: Some("closed locally".into()),
                }).await;
                break;
            }

            result = reader.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!("TCP connection closed by peer");
                        let _ = incoming_tx.send(TransportEvent::Disconnected { reason: None }).await;
                        break;
                    }
                    Ok(_) => {
                        let data = read_buf.split().freeze();
                        if incoming_tx.send(TransportEvent::Data(data)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("TCP read error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        }
    }

    *state.connected.lock() = false;
}

/// TCP transport (client side)
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Connect to a TCP server
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver)> {
        debug!("Connecting to TCP: {}", addr);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        configure_stream(&stream, &self.config);

        Ok(spawn_link(stream, &self.config))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// TCP sender for writing bytes
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    state: Arc<LinkState>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.state.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".into()))
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        if !*self.state.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.state.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let was_connected = std::mem::replace(&mut *self.state.connected.lock(), false);
        if was_connected {
            self.state.shutdown.notify_one();
        }
        Ok(())
    }
}

/// TCP receiver for reading bytes
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", addr, e)))?;

        info!("TCP server listening on {}", addr);

        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        debug!("TCP connection accepted from {}", peer_addr);
        configure_stream(&stream, &self.config);

        let (sender, receiver) = spawn_link(stream, &self.config);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        // TcpListener doesn't have a close method - it closes when dropped
        Ok(())
    }
}
