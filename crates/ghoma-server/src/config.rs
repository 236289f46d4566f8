//! Server configuration

use ghoma_core::frame::DEFAULT_MAX_BUFFER;
use ghoma_core::DEFAULT_PORT;
use ghoma_transport::TcpConfig;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, ServerError};

/// Control server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Listen port; must match the port configured on the plugs
    pub port: u16,
    /// Devices silent for longer than this are evicted (seconds).
    /// Also the period of the heartbeat sweep.
    pub heartbeat_timeout_secs: u64,
    /// Connections that have not finished the handshake within this time
    /// are closed (seconds)
    pub handshake_timeout_secs: u64,
    /// Maximum unframed bytes buffered per connection
    pub max_frame_buffer: usize,
    /// Capacity of the device event channel
    pub event_capacity: usize,
    /// Socket options for accepted connections
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            heartbeat_timeout_secs: 300,
            handshake_timeout_secs: 60,
            max_frame_buffer: DEFAULT_MAX_BUFFER,
            event_capacity: 256,
            tcp: TcpConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// `bind:port` as accepted by the TCP listener
    pub fn listen_addr(&self) -> String {
        listen_addr(&self.bind, self.port)
    }

    /// Reject values that would stall the sweep or the event channel
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout_secs == 0 {
            return Err(ServerError::Config(
                "heartbeat_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(ServerError::Config(
                "handshake_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ServerError::Config(
                "event_capacity must be greater than zero".into(),
            ));
        }
        if self.max_frame_buffer < 16 {
            return Err(ServerError::Config(format!(
                "max_frame_buffer too small: {}",
                self.max_frame_buffer
            )));
        }
        Ok(())
    }
}

/// Join a host and port, bracketing bare IPv6 literals
pub fn listen_addr(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, port)
    } else {
        format!("{}:{}", address, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4196);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(300));
        assert_eq!(config.listen_addr(), "0.0.0.0:4196");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let config = ServerConfig {
            bind: "::1".into(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.listen_addr(), "[::1]:9000");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ServerConfig {
            heartbeat_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }
}
