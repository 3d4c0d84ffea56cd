//! Broadcast to every connected client
//!
//! Sends go out concurrently over a registry snapshot. A client whose send
//! fails (closed connection, full queue past the send timeout) is removed and
//! closed after the round; the others are unaffected.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};
use vision_core::Envelope;

use crate::client::ClientId;
use crate::error::Result;
use crate::registry::ClientRegistry;

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Clients that accepted the message
    pub delivered: usize,
    /// Clients removed because their send failed
    pub dropped: Vec<ClientId>,
}

#[derive(Debug, Clone)]
pub struct Fanout {
    registry: Arc<ClientRegistry>,
}

impl Fanout {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Encode once and send to every client
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<FanoutReport> {
        let text = envelope.encode()?;
        Ok(self.broadcast_text(text).await)
    }

    /// Send pre-encoded text to every client
    pub async fn broadcast_text(&self, text: String) -> FanoutReport {
        let clients = self.registry.snapshot();
        if clients.is_empty() {
            return FanoutReport::default();
        }

        let results = join_all(clients.iter().map(|client| {
            let text = text.clone();
            async move { client.send_text(text).await }
        }))
        .await;

        let mut report = FanoutReport::default();
        let mut failed = Vec::new();
        for (client, result) in clients.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("Send to {} failed: {}", client.id, e);
                    failed.push(client.clone());
                }
            }
        }

        for client in failed {
            // The handler may have removed it already
            if self.registry.remove(&client.id).is_some() {
                warn!("Dropping client {} ({}) after failed send", client.id, client.addr);
            }
            client.close().await;
            report.dropped.push(client.id.clone());
        }

        report
    }
}
