//! Connected clients

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;
use vision_core::Envelope;
use vision_transport::{TransportError, TransportSender};

use crate::error::Result;

/// Client identifier, `client-<uuid>`
pub type ClientId = String;

/// One open dashboard connection
///
/// Owned by its connection handler; the registry and fan-out hold clones of
/// the `Arc`.
pub struct Client {
    /// Unique client ID
    pub id: ClientId,
    /// Peer address
    pub addr: SocketAddr,
    /// Connection time
    pub connected_at: Instant,
    sender: Arc<dyn TransportSender>,
    closed: watch::Sender<bool>,
}

impl Client {
    /// Create a client with a fresh ID
    pub fn new(sender: Arc<dyn TransportSender>, addr: SocketAddr) -> Self {
        Self::with_id(format!("client-{}", Uuid::new_v4()), sender, addr)
    }

    pub fn with_id(id: impl Into<ClientId>, sender: Arc<dyn TransportSender>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
            connected_at: Instant::now(),
            sender,
            closed: watch::channel(false).0,
        }
    }

    /// Send pre-encoded text
    pub async fn send_text(&self, text: String) -> std::result::Result<(), TransportError> {
        self.sender.send(text).await
    }

    /// Encode and send an envelope
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope.encode()?;
        self.send_text(text).await?;
        Ok(())
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Close the underlying connection and wake whoever owns it
    pub async fn close(&self) {
        self.closed.send_replace(true);
        let _ = self.sender.close().await;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` once [`Client::close`] has been called
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Time since the client connected
    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
