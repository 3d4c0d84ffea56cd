//! WebSocket transport implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

/// How long a closing writer may spend on the final close frame
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Largest inbound frame forwarded to the receiver; bigger frames are dropped
    pub max_message_size: usize,
    /// Outbound frames queued per connection before sends start waiting
    pub outbound_buffer: usize,
    /// How long a send may wait for queue space before it fails
    pub send_timeout: Duration,
    /// How long a client has to complete the upgrade handshake
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64KB
            outbound_buffer: 64,
            send_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// WebSocket transport (client side)
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            config: WebSocketConfig::default(),
        }
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Connect using this transport's configuration
    pub async fn connect_with(&self, url: &str) -> Result<(WebSocketSender, WebSocketReceiver)> {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_io(ws_stream, &self.config, url.to_string()))
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket sender
///
/// Frames go through a bounded queue to a dedicated writer task. Closing
/// signals both I/O tasks directly, so it works even when the queue is full
/// or the writer is blocked on a peer that stopped reading. Dropping the
/// sender closes the connection too.
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
    send_timeout: Duration,
    shutdown: watch::Sender<bool>,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        match timeout(self.send_timeout, self.tx.send(WsMessage::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.shutdown.send_replace(true);
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        WebSocketTransport::new().connect_with(url).await
    }
}

/// WebSocket server
pub struct WebSocketServer {
    listener: tokio::net::TcpListener,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {}: {}", addr, e)))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = timeout(
            self.config.handshake_timeout,
            tokio_tungstenite::accept_async(stream),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectionFailed(format!("handshake with {}: {}", addr, e)))?;

        info!("WebSocket client connected from {}", addr);

        let (sender, receiver) = spawn_io(ws_stream, &self.config, addr.to_string());
        Ok((sender, receiver, addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> Result<()> {
        // TCP listener doesn't need explicit close
        Ok(())
    }
}

/// Split an upgraded stream into a writer task and a reader task.
fn spawn_io<S>(
    ws_stream: WebSocketStream<S>,
    config: &WebSocketConfig,
    peer: String,
) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(config.outbound_buffer.max(1));
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Writer
    let writer_peer = peer.clone();
    let mut shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    // Best effort; the peer may not be reading at all
                    let _ = timeout(CLOSE_GRACE, write.send(WsMessage::Close(None))).await;
                    break;
                }
                msg = send_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            let closing = matches!(msg, WsMessage::Close(_));
            let written = tokio::select! {
                result = write.send(msg) => result,
                _ = shutdown.changed() => break,
            };
            if let Err(e) = written {
                debug!("WebSocket write error to {}: {}", writer_peer, e);
                break;
            }
            if closing {
                break;
            }
        }
        *connected_write.lock() = false;
    });

    // Reader
    let max_message_size = config.max_message_size;
    let mut shutdown = shutdown_rx;
    tokio::spawn(async move {
        let _ = event_tx.send(TransportEvent::Connected).await;

        let mut reason = None;
        loop {
            let result = tokio::select! {
                next = read.next() => match next {
                    Some(result) => result,
                    None => break,
                },
                _ = shutdown.changed() => {
                    reason = Some("closed locally".to_string());
                    break;
                }
            };

            let event = match result {
                Ok(WsMessage::Text(text)) => {
                    if text.len() > max_message_size {
                        warn!("Dropping {} byte frame from {}", text.len(), peer);
                        continue;
                    }
                    TransportEvent::Data(Bytes::from(text))
                }
                Ok(WsMessage::Binary(data)) => {
                    if data.len() > max_message_size {
                        warn!("Dropping {} byte frame from {}", data.len(), peer);
                        continue;
                    }
                    TransportEvent::Data(Bytes::from(data))
                }
                Ok(WsMessage::Close(frame)) => {
                    reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                // Pong replies are queued by tungstenite itself
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {
                    continue;
                }
                Err(e) => {
                    error!("WebSocket read error from {}: {}", peer, e);
                    reason = Some(e.to_string());
                    break;
                }
            };

            let delivered = tokio::select! {
                sent = event_tx.send(event) => sent.is_ok(),
                _ = shutdown.changed() => false,
            };
            if !delivered {
                break;
            }
        }

        *connected_read.lock() = false;
        // The receiver sees the end of the stream even if this does not fit
        let _ = event_tx.try_send(TransportEvent::Disconnected { reason });
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
        send_timeout: config.send_timeout,
        shutdown: shutdown_tx,
    };

    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_message_size, 64 * 1024);
        assert_eq!(config.outbound_buffer, 64);
        assert_eq!(config.send_timeout, Duration::from_secs(2));
    }
}
