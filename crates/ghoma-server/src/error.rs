//! Server error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] ghoma_transport::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ghoma_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
