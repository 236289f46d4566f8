//! Control server
//!
//! The server is transport-agnostic: it accepts connections from any
//! `TransportServer`. [`ControlServer::serve`] binds the TCP listener the
//! plugs expect.
//!
//! # Example
//!
//! ```no_run
//! use ghoma_server::{ControlServer, DeviceEvent, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(ControlServer::new(ServerConfig::default()));
//!
//!     let mut events = server.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let DeviceEvent::New { device } = event {
//!                 println!("new plug {} firmware {}", device.id, device.firmware);
//!             }
//!         }
//!     });
//!
//!     server.serve("0.0.0.0", 4196).await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use ghoma_transport::{TcpServer, TransportReceiver, TransportSender, TransportServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::config::{self, ServerConfig};
use crate::connection::run_connection;
use crate::device::DeviceView;
use crate::error::Result;
use crate::event::DeviceEvent;
use crate::monitor::HeartbeatMonitor;
use crate::registry::DeviceControl;
use crate::state::ServerState;

/// Pause after a failed accept so a persistent error cannot spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// G-Homa control server
pub struct ControlServer {
    state: Arc<ServerState>,
}

impl ControlServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: Arc::new(ServerState::new(config)),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        self.state.config()
    }

    /// Shared state, for embedding the server in a larger runtime
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Serve using any TransportServer implementation.
    ///
    /// Runs the heartbeat monitor alongside the accept loop. Returns once
    /// [`ControlServer::shutdown`] is called.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        if self.state.is_shutting_down() {
            return Ok(());
        }

        match server.local_addr() {
            Ok(addr) => info!("Control server accepting connections on {}", addr),
            Err(_) => info!("Control server accepting connections"),
        }

        let monitor = HeartbeatMonitor::new(self.state.clone()).spawn();
        let mut shutdown = self.state.shutdown_signal();

        loop {
            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        info!("CONNECTED {}", addr);
                        self.handle_connection(Arc::new(sender), receiver, addr);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        if let Err(e) = server.close().await {
            debug!("Error closing listener: {}", e);
        }
        if let Err(e) = monitor.await {
            error!("Heartbeat monitor task failed: {}", e);
        }

        info!("Control server stopped");
        Ok(())
    }

    /// Bind a TCP listener on `address:port` and serve on it
    pub async fn serve(&self, address: &str, port: u16) -> Result<()> {
        let addr = config::listen_addr(address, port);
        let server = TcpServer::bind_with_config(&addr, self.state.config().tcp.clone()).await?;
        self.serve_on(server).await
    }

    /// Serve on the configured bind address and port
    pub async fn start(&self) -> Result<()> {
        let config = self.state.config();
        self.serve(&config.bind, config.port).await
    }

    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let state = Arc::clone(&self.state);
        tokio::spawn(run_connection(state, sender, receiver, addr));
    }

    /// Stop accepting, stop the monitor and close every connection.
    ///
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        if !self.state.begin_shutdown() {
            debug!("Shutdown already in progress");
            return;
        }

        info!("SHUTDOWN control server");
        let closed = self.state.close_all("server shutdown").await;
        debug!("Closed {} device connection(s)", closed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.is_shutting_down()
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Look up a registered device by id (lowercase hex short MAC)
    pub fn get(&self, id: &str) -> Option<DeviceView> {
        self.state.registry().get(id)
    }

    pub fn for_each<F>(&self, visitor: F)
    where
        F: FnMut(&DeviceView),
    {
        self.state.registry().for_each(visitor)
    }

    pub fn devices(&self) -> Vec<DeviceView> {
        self.state.registry().devices()
    }

    pub fn device_count(&self) -> usize {
        self.state.registry().len()
    }

    /// Stream of device events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.state.events().subscribe()
    }
}

impl Default for ControlServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[async_trait]
impl DeviceControl for ControlServer {
    async fn switch_on(&self, id: &str) -> Result<()> {
        self.state.registry().switch_on(id).await
    }

    async fn switch_off(&self, id: &str) -> Result<()> {
        self.state.registry().switch_off(id).await
    }
}
