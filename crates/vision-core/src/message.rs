//! Raw bus events

use bytes::Bytes;

/// A message as received from the bus, before any decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Undecoded payload bytes
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
