//! Vision Relay Core
//!
//! Shared types for the MQTT to WebSocket relay behind the servo vision
//! dashboard.
//!
//! This crate provides:
//! - Bus payloads with checked access to the well-known fields ([`Payload`])
//! - Channel naming and classification ([`Channels`], [`ChannelKind`])
//! - Client-facing envelopes and client requests ([`Envelope`], [`ClientRequest`])
//! - Timing utilities ([`Timestamp`])

pub mod channel;
pub mod envelope;
pub mod error;
pub mod message;
pub mod payload;
pub mod time;

pub use channel::{ChannelKind, Channels};
pub use envelope::{ClientRequest, Envelope, RelayData};
pub use error::{Error, Result};
pub use message::BusMessage;
pub use payload::Payload;
pub use time::Timestamp;

/// Default WebSocket port for dashboard clients
pub const DEFAULT_WS_PORT: u16 = 9002;

/// Default MQTT broker port
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default team identifier, used in topic names and the welcome envelope
pub const DEFAULT_TEAM_ID: &str = "sudoers";

/// Source key used for heartbeats that carry no `node` field
pub const UNKNOWN_SOURCE: &str = "unknown";
