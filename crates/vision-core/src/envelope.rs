//! Client-facing envelopes and client requests
//!
//! Everything sent to a dashboard is a JSON object with a `type`
//! discriminator.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::time::Timestamp;

/// Data carried by an `mqtt_message` envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelayData {
    /// A single payload (live messages and the primary snapshot)
    Single(Payload),
    /// Latest payload per source (the heartbeat snapshot)
    BySource(BTreeMap<String, Payload>),
}

/// A message sent from the relay to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Sent once, right after the connection is accepted
    Welcome {
        team_id: String,
        client_id: String,
        timestamp: Timestamp,
        message: String,
    },
    /// A relayed bus message, or a cached snapshot of one
    MqttMessage { topic: String, data: RelayData },
    /// Reply to a client ping
    Pong { timestamp: Timestamp },
}

impl Envelope {
    pub fn welcome(team_id: &str, client_id: &str, timestamp: Timestamp) -> Self {
        Envelope::Welcome {
            team_id: team_id.to_string(),
            client_id: client_id.to_string(),
            timestamp,
            message: format!("Connected to {} team dashboard", team_id),
        }
    }

    pub fn relay(topic: impl Into<String>, payload: Payload) -> Self {
        Envelope::MqttMessage {
            topic: topic.into(),
            data: RelayData::Single(payload),
        }
    }

    pub fn relay_by_source(topic: impl Into<String>, entries: BTreeMap<String, Payload>) -> Self {
        Envelope::MqttMessage {
            topic: topic.into(),
            data: RelayData::BySource(entries),
        }
    }

    pub fn pong(timestamp: Timestamp) -> Self {
        Envelope::Pong { timestamp }
    }

    /// Envelope type name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Welcome { .. } => "welcome",
            Envelope::MqttMessage { .. } => "mqtt_message",
            Envelope::Pong { .. } => "pong",
        }
    }

    /// Serialize to JSON text
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::EncodeError(e.to_string()))
    }
}

/// A message received from a client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// Keepalive; answered with a pong
    Ping,
    /// Anything else that decodes as JSON. Carries the `type` field if it
    /// was a string.
    Other(Option<String>),
}

impl ClientRequest {
    /// Decode a client frame. Only invalid JSON is an error; unknown shapes
    /// are [`ClientRequest::Other`].
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| Error::DecodeError(e.to_string()))?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("ping") => ClientRequest::Ping,
            Some(other) => ClientRequest::Other(Some(other.to_string())),
            None => ClientRequest::Other(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_welcome_wire_format() {
        let env = Envelope::welcome("sudoers", "client-1", 1_700_000_000);
        let v: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "welcome",
                "team_id": "sudoers",
                "client_id": "client-1",
                "timestamp": 1_700_000_000,
                "message": "Connected to sudoers team dashboard",
            })
        );
    }

    #[test]
    fn test_relay_wire_format() {
        let payload = Payload::from_slice(br#"{"status":"MOVING","servo_angle":42,"timestamp":5}"#)
            .unwrap();
        let env = Envelope::relay("vision/sudoers/movement", payload);
        assert_eq!(env.kind(), "mqtt_message");

        let v: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "mqtt_message",
                "topic": "vision/sudoers/movement",
                "data": {"status": "MOVING", "servo_angle": 42, "timestamp": 5},
            })
        );
    }

    #[test]
    fn test_relay_by_source_wire_format() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "pi".to_string(),
            Payload::from_slice(br#"{"node":"pi","status":"ONLINE","timestamp":1}"#).unwrap(),
        );
        let env = Envelope::relay_by_source("vision/sudoers/heartbeat", entries);
        let v: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(
            v["data"]["pi"],
            json!({"node": "pi", "status": "ONLINE", "timestamp": 1})
        );
    }

    #[test]
    fn test_pong_wire_format() {
        let v: Value = serde_json::from_str(&Envelope::pong(7).encode().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "pong", "timestamp": 7}));
    }

    #[test]
    fn test_client_request_decode() {
        assert_eq!(
            ClientRequest::decode(br#"{"type":"ping"}"#).unwrap(),
            ClientRequest::Ping
        );
        assert_eq!(
            ClientRequest::decode(br#"{"type":"subscribe","topic":"x"}"#).unwrap(),
            ClientRequest::Other(Some("subscribe".to_string()))
        );
        assert_eq!(
            ClientRequest::decode(b"[1,2]").unwrap(),
            ClientRequest::Other(None)
        );
        assert_eq!(
            ClientRequest::decode(br#"{"type":5}"#).unwrap(),
            ClientRequest::Other(None)
        );
        assert!(ClientRequest::decode(b"{oops").is_err());
    }
}
