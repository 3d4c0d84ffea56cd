//! Vision Relay Server
//!
//! Subscribes to the team's vision topics on an MQTT broker and relays every
//! message to the connected dashboard WebSocket clients.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vision_bridge::{Bridge, MqttBridge};
use vision_router::Relay;
use vision_transport::WebSocketServer;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "vision-relay")]
#[command(about = "MQTT to WebSocket relay for the vision dashboard")]
#[command(version)]
struct Cli {
    /// Config file path (TOML)
    #[arg(short, long, env = "VISION_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket listen host
    #[arg(long, env = "WEBSOCKET_HOST")]
    host: Option<String>,

    /// WebSocket listen port
    #[arg(short = 'p', long, env = "WEBSOCKET_PORT")]
    ws_port: Option<u16>,

    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER_HOST")]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_BROKER_PORT")]
    mqtt_port: Option<u16>,

    /// Team identifier; selects the default topics
    #[arg(short, long, env = "VISION_TEAM_ID")]
    team_id: Option<String>,

    /// MQTT username
    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    /// MQTT password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Load the file config (if any) and apply flag overrides
    fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.ws_port {
            config.server.port = port;
        }
        if let Some(host) = &self.mqtt_host {
            config.bus.host = host.clone();
        }
        if let Some(port) = self.mqtt_port {
            config.bus.port = port;
        }
        if let Some(team_id) = &self.team_id {
            config.relay.team_id = team_id.clone();
        }
        if let Some(username) = &self.username {
            config.bus.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.bus.password = Some(password.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.resolve()?;
    let relay_config = config.relay_config();
    let bridge_config = config.bridge_config();

    info!("Starting Vision Relay");
    info!("Team ID: {}", relay_config.team_id);
    info!("MQTT broker: {}:{}", config.bus.host, config.bus.port);
    info!(
        "Topics: {}, {}",
        relay_config.channels.primary, relay_config.channels.heartbeat
    );
    info!("WebSocket port: {}", config.server.port);

    let listen_addr = config.listen_addr();
    let server = WebSocketServer::bind(&listen_addr)
        .await
        .with_context(|| format!("cannot listen on {}", listen_addr))?
        .with_config(relay_config.websocket.clone());

    let mut bridge = MqttBridge::new(bridge_config);
    let bus_rx = bridge
        .start()
        .await
        .with_context(|| format!("cannot connect to MQTT broker {}:{}", config.bus.host, config.bus.port))?;

    let relay = Relay::new(relay_config);
    let ingest = tokio::spawn(relay.ingest().run(bus_rx));

    let serving = relay.clone();
    let mut serve = tokio::spawn(async move { serving.serve_on(server).await });

    info!("Relay ready on ws://{}", listen_addr);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Shutting down");
        }
        result = &mut serve => {
            match result {
                Ok(Ok(())) => info!("Listener stopped"),
                Ok(Err(e)) => error!("Listener failed: {}", e),
                Err(e) => error!("Listener task panicked: {}", e),
            }
        }
    }

    relay.stop();
    if let Err(e) = bridge.stop().await {
        error!("Error stopping MQTT bridge: {}", e);
    }

    // The bus channel closes once the event loop exits; let ingest drain
    if tokio::time::timeout(Duration::from_secs(5), ingest).await.is_err() {
        error!("Ingest did not drain within 5s");
    }
    if !serve.is_finished() {
        let _ = serve.await;
    }

    info!("Vision Relay stopped");
    Ok(())
}
