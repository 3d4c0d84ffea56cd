//! Relay: the listener side of the service
//!
//! Owns the shared registry and cache, accepts dashboard connections and
//! hands each one to a [`ConnectionHandler`]. Bus traffic enters through the
//! [`Ingest`] handle returned by [`Relay::ingest`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use vision_core::Channels;
use vision_transport::{TransportError, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "websocket")]
use vision_transport::{WebSocketConfig, WebSocketServer};

use crate::cache::ChannelCache;
use crate::client::Client;
use crate::error::Result;
use crate::fanout::Fanout;
use crate::handler::ConnectionHandler;
use crate::ingest::Ingest;
use crate::registry::ClientRegistry;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Team named in the welcome message
    pub team_id: String,
    /// Primary and heartbeat topics
    pub channels: Channels,
    /// Listener settings
    #[cfg(feature = "websocket")]
    pub websocket: WebSocketConfig,
}

impl RelayConfig {
    /// Default settings with the team's standard topics
    pub fn for_team(team_id: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            channels: Channels::for_team(team_id),
            ..Default::default()
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            team_id: vision_core::DEFAULT_TEAM_ID.to_string(),
            channels: Channels::default(),
            #[cfg(feature = "websocket")]
            websocket: WebSocketConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct Relay {
    config: Arc<RelayConfig>,
    registry: Arc<ClientRegistry>,
    cache: Arc<ChannelCache>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            registry: Arc::new(ClientRegistry::new()),
            cache: Arc::new(ChannelCache::new()),
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle for feeding bus messages into the relay
    pub fn ingest(&self) -> Ingest {
        Ingest::new(
            self.cache.clone(),
            self.fanout(),
            self.config.channels.clone(),
        )
    }

    pub fn fanout(&self) -> Fanout {
        Fanout::new(self.registry.clone())
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ChannelCache> {
        &self.cache
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Accept connections from `server` until [`Relay::stop`] is called
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        if let Ok(addr) = server.local_addr() {
            info!("Relay accepting connections on {}", addr);
        }
        let mut stop = self.stop_tx.subscribe();

        loop {
            let stopped = *stop.borrow();
            if stopped {
                break;
            }

            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        self.handle_connection(Arc::new(sender), receiver, addr);
                    }
                    Err(TransportError::Io(e)) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    Err(e) => {
                        // Failed handshake; the listener is fine
                        warn!("Rejected connection: {}", e);
                    }
                },
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = server.close().await;
        info!("Relay stopped accepting connections");
        Ok(())
    }

    /// Bind a WebSocket listener and serve on it
    #[cfg(feature = "websocket")]
    pub async fn serve_websocket(&self, addr: &str) -> Result<()> {
        let server = WebSocketServer::bind(addr)
            .await?
            .with_config(self.config.websocket.clone());
        self.serve_on(server).await
    }

    /// Spawn a handler for an accepted connection
    pub fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let client = Arc::new(Client::new(sender, addr));
        let handler = ConnectionHandler::new(
            client,
            receiver,
            self.registry.clone(),
            self.cache.clone(),
            self.config.clone(),
            self.stop_tx.subscribe(),
        );

        tokio::spawn(async move {
            if let Err(e) = handler.run().await {
                debug!("Connection from {} ended: {}", addr, e);
            }
        });
    }

    /// Stop accepting and close every open connection
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("team_id", &self.config.team_id)
            .field("clients", &self.registry.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
