//! G-Homa Control Server
//!
//! The server is the other end of the plugs' TCP connection:
//! - Performs the handshake that identifies each plug
//! - Tracks switch state and energy readings per device
//! - Evicts devices that stop sending heartbeats
//! - Publishes device events to any number of subscribers
//! - Sends on/off commands
//!
//! # Example
//!
//! ```no_run
//! use ghoma_server::{ControlServer, DeviceControl, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(ControlServer::new(ServerConfig::default()));
//!
//!     let runner = server.clone();
//!     tokio::spawn(async move { runner.start().await });
//!
//!     // later
//!     if server.get("d78a91").is_some() {
//!         server.switch_on("d78a91").await?;
//!     }
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod event;
pub mod handshake;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use device::{ConnectionId, DeviceRecord, DeviceView, EnergyReading};
pub use error::{Result, ServerError};
pub use event::{DeviceEvent, EventBus};
pub use handshake::{DeviceIdentity, Handshake, HandshakeState, HandshakeStep};
pub use monitor::HeartbeatMonitor;
pub use registry::{DeviceControl, DeviceRegistry, Registration};
pub use server::ControlServer;
pub use state::ServerState;
