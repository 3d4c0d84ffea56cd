//! Common test helpers for the vision relay crates
//!
//! - Port allocation and condition-based waiting (no hardcoded sleeps)
//! - A relay served on an ephemeral port, aborted on drop
//! - A JSON-speaking WebSocket test client
//! - Mock senders for registry and fan-out tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use vision_router::{Relay, RelayConfig};
use vision_transport::{
    Transport, TransportError, TransportEvent, TransportReceiver, TransportSender,
    TransportServer, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport,
};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Loopback address for mock clients
pub fn test_addr() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

// ============================================================================
// Test Relay
// ============================================================================

/// A relay listening on an ephemeral port; stopped on drop
pub struct TestRelay {
    relay: Relay,
    addr: SocketAddr,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        Self::start_with_config(RelayConfig::default()).await
    }

    pub async fn start_with_config(config: RelayConfig) -> Self {
        let server = WebSocketServer::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_config(config.websocket.clone());
        let addr = server.local_addr().unwrap();

        let relay = Relay::new(config);
        let serving = relay.clone();
        let handle = tokio::spawn(async move {
            let _ = serving.serve_on(server).await;
        });

        Self {
            relay,
            addr,
            handle: Some(handle),
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connect a client and wait until the relay has registered it
    pub async fn connect(&self) -> TestClient {
        let before = self.relay.client_count();
        let client = TestClient::connect(&self.url()).await;
        let registry = self.relay.registry().clone();
        wait_for(
            || {
                let registry = registry.clone();
                async move { registry.len() > before }
            },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await;
        client
    }

    /// Wait until exactly `n` clients are registered
    pub async fn wait_for_clients(&self, n: usize) -> bool {
        let registry = self.relay.registry().clone();
        wait_for(
            || {
                let registry = registry.clone();
                async move { registry.len() == n }
            },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await
    }

    pub fn stop(&mut self) {
        self.relay.stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// WebSocket client that speaks JSON text frames
pub struct TestClient {
    sender: WebSocketSender,
    receiver: WebSocketReceiver,
}

impl TestClient {
    pub async fn connect(url: &str) -> Self {
        let (sender, receiver) = WebSocketTransport::connect(url).await.unwrap();
        Self { sender, receiver }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.sender.send(text.to_string()).await
    }

    pub async fn send_json(&self, value: &Value) -> Result<(), TransportError> {
        self.sender.send(value.to_string()).await
    }

    /// Next JSON frame, or `None` on timeout or disconnect
    pub async fn recv_json(&mut self, max_wait: Duration) -> Option<Value> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Data(data))) => {
                    return serde_json::from_slice(&data).ok();
                }
                Ok(Some(TransportEvent::Connected)) => continue,
                _ => return None,
            }
        }
    }

    /// Next frame whose `type` field matches
    pub async fn recv_type(&mut self, kind: &str, max_wait: Duration) -> Option<Value> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let value = self.recv_json(remaining).await?;
            if value["type"] == kind {
                return Some(value);
            }
        }
    }

    /// True if the relay closes the connection within `max_wait`
    pub async fn wait_closed(&mut self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            match timeout(remaining, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Disconnected { .. })) | Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}

// ============================================================================
// Mock Senders
// ============================================================================

/// Sender that records every frame it is given
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Recorded frames parsed as JSON
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSender for RecordingSender {
    async fn send(&self, text: String) -> vision_transport::Result<()> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    async fn close(&self) -> vision_transport::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Sender that fails like a dead peer, optionally after some good sends
#[derive(Default)]
pub struct FailingSender {
    remaining_ok: AtomicUsize,
    closed: AtomicBool,
}

impl FailingSender {
    /// Every send fails
    pub fn new() -> Arc<Self> {
        Self::after(0)
    }

    /// The first `ok` sends succeed, the rest fail
    pub fn after(ok: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining_ok: AtomicUsize::new(ok),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn good_sends_left(&self) -> usize {
        self.remaining_ok.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSender for FailingSender {
    async fn send(&self, _text: String) -> vision_transport::Result<()> {
        let accepted = self
            .remaining_ok
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if accepted && !self.is_closed() {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    async fn close(&self) -> vision_transport::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Receiver fed by the test through an mpsc channel
pub struct ScriptedReceiver {
    rx: tokio::sync::mpsc::Receiver<TransportEvent>,
}

impl ScriptedReceiver {
    /// The sending half scripts what the handler under test receives
    pub fn channel() -> (tokio::sync::mpsc::Sender<TransportEvent>, Self) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        (tx, Self { rx })
    }
}

#[async_trait]
impl TransportReceiver for ScriptedReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}
