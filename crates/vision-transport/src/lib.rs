//! Vision Relay Transport Layer
//!
//! Hands the relay one `(sender, receiver, peer address)` triple per client
//! connection. WebSocket is the only transport the dashboard uses.

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport,
};
