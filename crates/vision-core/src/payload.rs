//! Bus payloads
//!
//! Movement and heartbeat messages are JSON objects. The object is stored
//! and relayed exactly as received (apart from a filled-in timestamp); the
//! fields the relay acts on are read through checked accessors that yield
//! `None` when a field is missing or has an unexpected type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;

use crate::error::{Error, Result};
use crate::time::Timestamp;
use crate::UNKNOWN_SOURCE;

pub const TIMESTAMP: &str = "timestamp";
pub const NODE: &str = "node";
pub const STATUS: &str = "status";
pub const SERVO_ANGLE: &str = "servo_angle";

/// A decoded bus payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    fields: Map<String, Value>,
}

impl Payload {
    /// Decode a payload from raw bus bytes.
    ///
    /// The bytes must be UTF-8 and hold a JSON object. Field types are not
    /// checked.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| Error::InvalidPayload(format!("payload is not UTF-8: {}", e)))?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::DecodeError(e.to_string()))?;
        Self::from_value(value)
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(Error::DecodeError(format!(
                "payload is not a JSON object: {}",
                json_kind(&other)
            ))),
        }
    }

    /// Set `timestamp` to `now` if the producer did not supply the field.
    ///
    /// A field that is present is left alone whatever its type. Returns
    /// `true` if the timestamp was assigned.
    pub fn ensure_timestamp(&mut self, now: Timestamp) -> bool {
        if self.fields.contains_key(TIMESTAMP) {
            return false;
        }
        self.fields
            .insert(TIMESTAMP.to_string(), Value::Number(Number::from(now)));
        true
    }

    /// Numeric timestamp, if present
    pub fn timestamp(&self) -> Option<&Number> {
        self.fields.get(TIMESTAMP).and_then(as_number)
    }

    /// Reporting node, if it is a string
    pub fn node(&self) -> Option<&str> {
        self.fields.get(NODE).and_then(Value::as_str)
    }

    pub fn status(&self) -> Option<&str> {
        self.fields.get(STATUS).and_then(Value::as_str)
    }

    /// Servo angle in degrees, if numeric
    pub fn servo_angle(&self) -> Option<&Number> {
        self.fields.get(SERVO_ANGLE).and_then(as_number)
    }

    /// Key used to store this payload on a per-source channel.
    ///
    /// A string `node` is used as is, any other non-null value by its JSON
    /// text; a missing or null `node` maps to `unknown`.
    pub fn source_key(&self) -> Cow<'_, str> {
        match self.fields.get(NODE) {
            Some(Value::String(node)) => Cow::Borrowed(node),
            None | Some(Value::Null) => Cow::Borrowed(UNKNOWN_SOURCE),
            Some(other) => Cow::Owned(other.to_string()),
        }
    }

    /// Status for log lines
    pub fn status_or_unknown(&self) -> &str {
        self.status().unwrap_or("UNKNOWN")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn as_number(value: &Value) -> Option<&Number> {
    match value {
        Value::Number(n) => Some(n),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_typed_fields() {
        let p = Payload::from_slice(br#"{"status":"MOVING","servo_angle":42,"face":true}"#).unwrap();
        assert_eq!(p.status(), Some("MOVING"));
        assert_eq!(p.servo_angle(), Some(&Number::from(42)));
        assert_eq!(p.get("face"), Some(&json!(true)));
        assert!(p.timestamp().is_none());
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            Payload::from_slice(b"[1,2,3]"),
            Err(Error::DecodeError(_))
        ));
        assert!(matches!(
            Payload::from_slice(b"\"text\""),
            Err(Error::DecodeError(_))
        ));
        assert!(matches!(
            Payload::from_slice(b"not json"),
            Err(Error::DecodeError(_))
        ));
        assert!(matches!(
            Payload::from_slice(&[0xff, 0xfe]),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_mismatched_field_types_are_accepted() {
        let raw = br#"{"timestamp":"2024-01-01T00:00:00Z","node":7,"status":false,"servo_angle":"left"}"#;
        let mut p = Payload::from_slice(raw).unwrap();

        assert!(p.timestamp().is_none());
        assert!(p.node().is_none());
        assert!(p.status().is_none());
        assert!(p.servo_angle().is_none());
        assert_eq!(p.status_or_unknown(), "UNKNOWN");

        // Present but non-numeric timestamp is still the producer's
        assert!(!p.ensure_timestamp(1));
        assert_eq!(
            serde_json::to_value(&p).unwrap(),
            serde_json::from_slice::<Value>(raw).unwrap()
        );
    }

    #[test]
    fn test_explicit_nulls_survive() {
        let p = Payload::from_slice(br#"{"status":null,"servo_angle":null,"timestamp":5}"#).unwrap();
        assert!(p.status().is_none());
        assert_eq!(
            serde_json::to_value(&p).unwrap(),
            json!({"status": null, "servo_angle": null, "timestamp": 5})
        );
    }

    #[test]
    fn test_ensure_timestamp() {
        let mut p = Payload::default();
        assert!(p.ensure_timestamp(1_700_000_000));
        assert_eq!(p.timestamp(), Some(&Number::from(1_700_000_000)));

        // Second call keeps the first value
        assert!(!p.ensure_timestamp(1_800_000_000));
        assert_eq!(p.timestamp(), Some(&Number::from(1_700_000_000)));
    }

    #[test]
    fn test_existing_timestamp_survives_round_trip() {
        let raw = br#"{"timestamp":1700000000.25,"status":"IDLE"}"#;
        let mut p = Payload::from_slice(raw).unwrap();
        assert!(!p.ensure_timestamp(1));

        let out = serde_json::to_value(&p).unwrap();
        assert_eq!(out, json!({"timestamp": 1700000000.25, "status": "IDLE"}));
    }

    #[test]
    fn test_source_key() {
        let p = Payload::default();
        assert_eq!(p.source_key(), "unknown");

        let p = Payload::from_slice(br#"{"node":null}"#).unwrap();
        assert_eq!(p.source_key(), "unknown");

        let p = Payload::from_slice(br#"{"node":"pi-cam"}"#).unwrap();
        assert_eq!(p.source_key(), "pi-cam");

        let p = Payload::from_slice(br#"{"node":7}"#).unwrap();
        assert_eq!(p.source_key(), "7");
    }
}
