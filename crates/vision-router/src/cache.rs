//! Channel state cache
//!
//! Latest payload per channel, or per (channel, source) for channels whose
//! producers report independently. Entries are replaced whole, so a reader
//! sees either the old payload or the new one.

use dashmap::DashMap;
use std::collections::BTreeMap;
use vision_core::Payload;

#[derive(Debug, Default)]
pub struct ChannelCache {
    /// Single-valued channels
    latest: DashMap<String, Payload>,
    /// Per-source channels: channel -> source -> payload
    by_source: DashMap<String, BTreeMap<String, Payload>>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest payload, overwriting any previous one for the same key
    pub fn put(&self, channel: &str, source: Option<&str>, payload: Payload) {
        match source {
            None => {
                self.latest.insert(channel.to_string(), payload);
            }
            Some(source) => {
                self.by_source
                    .entry(channel.to_string())
                    .or_default()
                    .insert(source.to_string(), payload);
            }
        }
    }

    /// Latest payload for a key, if any
    pub fn get(&self, channel: &str, source: Option<&str>) -> Option<Payload> {
        match source {
            None => self.latest.get(channel).map(|p| p.value().clone()),
            Some(source) => self
                .by_source
                .get(channel)
                .and_then(|entries| entries.get(source).cloned()),
        }
    }

    /// Copy of every per-source entry for a channel
    pub fn sources(&self, channel: &str) -> BTreeMap<String, Payload> {
        self.by_source
            .get(channel)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Number of stored payloads
    pub fn len(&self) -> usize {
        self.latest.len()
            + self
                .by_source
                .iter()
                .map(|entry| entry.value().len())
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.latest.clear();
        self.by_source.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Number};

    fn payload(status: &str) -> Payload {
        Payload::from_value(json!({"status": status, "timestamp": 1})).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cache = ChannelCache::new();
        assert!(cache.get("movement", None).is_none());

        cache.put("movement", None, payload("MOVING"));
        assert_eq!(cache.get("movement", None), Some(payload("MOVING")));
    }

    #[test]
    fn test_overwrite_single_slot() {
        let cache = ChannelCache::new();
        cache.put("movement", None, payload("MOVING"));
        cache.put("movement", None, payload("IDLE"));

        assert_eq!(cache.get("movement", None), Some(payload("IDLE")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sources_are_independent() {
        let cache = ChannelCache::new();
        cache.put("heartbeat", Some("pi"), payload("ONLINE"));
        cache.put("heartbeat", Some("laptop"), payload("ONLINE"));
        cache.put("heartbeat", Some("pi"), payload("DEGRADED"));

        assert_eq!(cache.get("heartbeat", Some("pi")), Some(payload("DEGRADED")));
        assert_eq!(cache.get("heartbeat", Some("laptop")), Some(payload("ONLINE")));
        assert_eq!(cache.sources("heartbeat").len(), 2);
        assert_eq!(cache.len(), 2);

        // The single slot for the same channel name is separate
        assert!(cache.get("heartbeat", None).is_none());
    }

    #[test]
    fn test_sources_of_unknown_channel_is_empty() {
        let cache = ChannelCache::new();
        assert!(cache.sources("nothing").is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = ChannelCache::new();
        cache.put("movement", None, payload("MOVING"));
        cache.put("heartbeat", Some("pi"), payload("ONLINE"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_put_get() {
        use std::sync::Arc;

        let cache = Arc::new(ChannelCache::new());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for n in 0..500 {
                        cache.put("movement", None, payload(&format!("W{}-{}", i, n)));
                        cache.put("heartbeat", Some(&format!("node{}", i)), payload("ONLINE"));
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            if let Some(p) = cache.get("movement", None) {
                // Whole payloads only
                assert!(p.status().unwrap().starts_with('W'));
                assert_eq!(p.timestamp(), Some(&Number::from(1)));
            }
        }

        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(cache.sources("heartbeat").len(), 4);
    }
}
