//! Bridge trait definitions

use async_trait::async_trait;
use tokio::sync::mpsc;
use vision_core::BusMessage;

use crate::Result;

/// Main bridge trait
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Connect and start delivering bus messages.
    ///
    /// Fails if the bus cannot be reached. The returned channel closes once
    /// the bridge has stopped.
    async fn start(&mut self) -> Result<mpsc::Receiver<BusMessage>>;

    /// Stop the bridge and close the bus connection
    async fn stop(&mut self) -> Result<()>;

    /// Check if the bridge is running
    fn is_running(&self) -> bool;
}
