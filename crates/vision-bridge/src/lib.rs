//! Vision Relay Bus Bridges
//!
//! A bridge connects to an external message bus and hands every received
//! message to the relay as a [`vision_core::BusMessage`] over a bounded
//! channel. The bridge never waits on the relay: when the channel is full
//! the message is dropped.

pub mod error;
pub mod traits;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use error::{BridgeError, Result};
pub use traits::Bridge;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBridge, MqttBridgeConfig};
