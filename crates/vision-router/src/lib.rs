//! Vision Relay Router
//!
//! The relay engine between the message bus and the dashboard clients:
//! - Keeps the latest payload per channel (and per node for heartbeats)
//! - Tracks connected clients
//! - Fans bus messages out to every client, dropping the ones that fail
//! - Greets new clients with the cached state and answers their pings
//!
//! # Example
//!
//! ```no_run
//! use vision_router::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = Relay::new(RelayConfig::default());
//!
//!     // Bus messages go in through the ingest handle
//!     let (_bus_tx, bus_rx) = tokio::sync::mpsc::channel(256);
//!     tokio::spawn(relay.ingest().run(bus_rx));
//!
//!     relay.serve_websocket("0.0.0.0:9002").await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod fanout;
pub mod handler;
pub mod ingest;
pub mod registry;
pub mod relay;

pub use cache::ChannelCache;
pub use client::{Client, ClientId};
pub use error::{Result, RouterError};
pub use fanout::{Fanout, FanoutReport};
pub use handler::{ConnectionHandler, ConnectionState};
pub use ingest::Ingest;
pub use registry::ClientRegistry;
pub use relay::{Relay, RelayConfig};
