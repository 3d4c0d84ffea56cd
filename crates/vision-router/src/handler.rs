//! Per-connection handling
//!
//! A handler owns one accepted connection from registration to close:
//! greet the client, replay the cached state, then answer pings until the
//! client goes away or the relay stops.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vision_core::{time, ClientRequest, Envelope};
use vision_transport::{TransportEvent, TransportReceiver};

use crate::cache::ChannelCache;
use crate::client::{Client, ClientId};
use crate::error::{Result, RouterError};
use crate::registry::ClientRegistry;
use crate::relay::RelayConfig;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not yet registered
    Connecting,
    /// Registered and receiving broadcasts
    Active,
    /// Deregistered
    Closed,
}

/// Removes the client from the registry when dropped, on every exit path
struct Registration {
    registry: Arc<ClientRegistry>,
    id: ClientId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.remove(&self.id).is_some() {
            debug!("Client {} deregistered", self.id);
        }
    }
}

pub struct ConnectionHandler<R> {
    client: Arc<Client>,
    receiver: R,
    registry: Arc<ClientRegistry>,
    cache: Arc<ChannelCache>,
    config: Arc<RelayConfig>,
    stop: watch::Receiver<bool>,
    closed: watch::Receiver<bool>,
    state: ConnectionState,
    registration: Option<Registration>,
}

impl<R: TransportReceiver> ConnectionHandler<R> {
    pub fn new(
        client: Arc<Client>,
        receiver: R,
        registry: Arc<ClientRegistry>,
        cache: Arc<ChannelCache>,
        config: Arc<RelayConfig>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let closed = client.close_signal();
        Self {
            client,
            receiver,
            registry,
            cache,
            config,
            stop,
            closed,
            state: ConnectionState::Connecting,
            registration: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Register the client, then send the welcome and the cached snapshots.
    ///
    /// On error the client is deregistered again.
    pub async fn open(&mut self) -> Result<()> {
        if !self.registry.add(self.client.clone()) {
            self.state = ConnectionState::Closed;
            return Err(RouterError::Other(format!(
                "client id {} already registered",
                self.client.id
            )));
        }
        self.registration = Some(Registration {
            registry: self.registry.clone(),
            id: self.client.id.clone(),
        });
        self.state = ConnectionState::Active;
        info!(
            "Client {} connected from {} ({} total)",
            self.client.id,
            self.client.addr,
            self.registry.len()
        );

        if let Err(e) = greet(&self.client, &self.cache, &self.config).await {
            self.deregister();
            return Err(e);
        }
        Ok(())
    }

    fn deregister(&mut self) {
        drop(self.registration.take());
        self.state = ConnectionState::Closed;
    }

    /// Drive the connection to completion
    pub async fn run(mut self) -> Result<()> {
        if self.state == ConnectionState::Connecting {
            if let Err(e) = self.open().await {
                self.client.close().await;
                return Err(e);
            }
        }

        let result = self.serve().await;

        self.deregister();
        self.client.close().await;
        info!(
            "Client {} disconnected after {:?} ({} remaining)",
            self.client.id,
            self.client.uptime(),
            self.registry.len()
        );
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let stopped = *self.stop.borrow();
            if stopped {
                debug!("Relay stopping, closing {}", self.client.id);
                return Ok(());
            }
            let closed = *self.closed.borrow();
            if closed {
                debug!("Client {} was closed by the relay", self.client.id);
                return Ok(());
            }

            tokio::select! {
                event = self.receiver.recv() => match event {
                    Some(TransportEvent::Data(data)) => on_data(&self.client, &data).await?,
                    Some(TransportEvent::Connected) => {}
                    Some(TransportEvent::Disconnected { reason }) => {
                        debug!("Client {} closed: {:?}", self.client.id, reason);
                        return Ok(());
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!("Transport error from {}: {}", self.client.id, e);
                        return Ok(());
                    }
                    None => return Ok(()),
                },
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = self.closed.changed() => {}
            }
        }
    }
}

async fn greet(client: &Client, cache: &ChannelCache, config: &RelayConfig) -> Result<()> {
    let welcome = Envelope::welcome(&config.team_id, &client.id, time::now());
    client.send_envelope(&welcome).await?;

    let channels = &config.channels;
    if let Some(latest) = cache.get(&channels.primary, None) {
        client
            .send_envelope(&Envelope::relay(channels.primary.as_str(), latest))
            .await?;
    }

    let heartbeats = cache.sources(&channels.heartbeat);
    if !heartbeats.is_empty() {
        client
            .send_envelope(&Envelope::relay_by_source(
                channels.heartbeat.as_str(),
                heartbeats,
            ))
            .await?;
    }
    Ok(())
}

/// Handle one client frame. Only a failed pong ends the connection.
async fn on_data(client: &Client, data: &[u8]) -> Result<()> {
    debug!(
        "Received from {}: {}",
        client.id,
        String::from_utf8_lossy(data)
    );
    match ClientRequest::decode(data) {
        Ok(ClientRequest::Ping) => client.send_envelope(&Envelope::pong(time::now())).await,
        Ok(ClientRequest::Other(kind)) => {
            debug!("Ignoring {:?} message from {}", kind, client.id);
            Ok(())
        }
        Err(e) => {
            warn!("Invalid JSON from {}: {}", client.id, e);
            Ok(())
        }
    }
}
