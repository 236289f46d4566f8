//! G-Homa Transport Layer
//!
//! Byte-stream transports for the control server. A transport only moves
//! bytes; framing is done by `ghoma-core` on the receiving side.
//!
//! - TCP (plugs connect to the server over plain TCP)

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer, TcpTransport};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
