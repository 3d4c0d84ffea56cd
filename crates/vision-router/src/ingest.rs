//! Bus message ingestion
//!
//! Decodes each bus message, fills in a missing timestamp, stores it in the
//! channel cache and fans it out. Messages that fail to decode are logged
//! and skipped; nothing here stops the loop.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vision_core::{time, BusMessage, ChannelKind, Channels, Envelope, Payload};

use crate::cache::ChannelCache;
use crate::error::Result;
use crate::fanout::{Fanout, FanoutReport};

#[derive(Debug, Clone)]
pub struct Ingest {
    cache: Arc<ChannelCache>,
    fanout: Fanout,
    channels: Channels,
}

impl Ingest {
    pub fn new(cache: Arc<ChannelCache>, fanout: Fanout, channels: Channels) -> Self {
        Self {
            cache,
            fanout,
            channels,
        }
    }

    /// Process one bus message
    pub async fn on_event(&self, topic: &str, raw: &[u8]) -> Result<FanoutReport> {
        let mut payload = Payload::from_slice(raw)?;
        payload.ensure_timestamp(time::now());

        match self.channels.classify(topic) {
            Some(ChannelKind::Primary) => {
                info!(
                    "Movement: {} (angle: {})",
                    payload.status_or_unknown(),
                    payload
                        .servo_angle()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "n/a".to_string())
                );
                self.cache.put(topic, None, payload.clone());
            }
            Some(ChannelKind::Heartbeat) => {
                let source = payload.source_key().into_owned();
                info!("Heartbeat from {}: {}", source, payload.status_or_unknown());
                self.cache.put(topic, Some(&source), payload.clone());
            }
            None => {
                debug!("Relaying message on unrecognised topic {}", topic);
            }
        }

        let report = self.fanout.broadcast(&Envelope::relay(topic, payload)).await?;
        debug!(
            "Relayed {} to {} client(s), dropped {}",
            topic,
            report.delivered,
            report.dropped.len()
        );
        Ok(report)
    }

    pub async fn handle(&self, msg: BusMessage) -> Result<FanoutReport> {
        self.on_event(&msg.topic, &msg.payload).await
    }

    /// Consume bus messages until the channel closes
    pub async fn run(self, mut rx: mpsc::Receiver<BusMessage>) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = self.handle(msg.clone()).await {
                warn!("Skipping message on {}: {}", msg.topic, e);
            }
        }
        info!("Bus channel closed, ingest stopped");
    }
}
