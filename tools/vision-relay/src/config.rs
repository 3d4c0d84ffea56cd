//! Server configuration
//!
//! Built from defaults, then an optional TOML file, then CLI flags and
//! environment variables, each layer overriding the one before.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use vision_bridge::MqttBridgeConfig;
use vision_core::Channels;
use vision_router::RelayConfig;
use vision_transport::WebSocketConfig;

/// `[server]`: the dashboard WebSocket listener
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub max_message_size: usize,
    pub outbound_buffer: usize,
    pub send_timeout_ms: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        let ws = WebSocketConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: vision_core::DEFAULT_WS_PORT,
            max_message_size: ws.max_message_size,
            outbound_buffer: ws.outbound_buffer,
            send_timeout_ms: ws.send_timeout.as_millis() as u64,
            handshake_timeout_secs: ws.handshake_timeout.as_secs(),
        }
    }
}

/// `[bus]`: the MQTT broker connection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
    pub keep_alive_secs: u16,
    pub channel_capacity: usize,
    pub connect_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for BusSection {
    fn default() -> Self {
        let mqtt = MqttBridgeConfig::default();
        Self {
            host: mqtt.broker_host,
            port: mqtt.broker_port,
            client_id: None,
            username: None,
            password: None,
            qos: mqtt.qos,
            keep_alive_secs: mqtt.keep_alive_secs,
            channel_capacity: mqtt.channel_capacity,
            connect_timeout_secs: mqtt.connect_timeout_secs,
            reconnect_delay_secs: mqtt.reconnect_delay_secs,
        }
    }
}

/// `[relay]`: team identity and topics
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub team_id: String,
    /// Overrides `vision/<team>/movement`
    pub primary_topic: Option<String>,
    /// Overrides `vision/<team>/heartbeat`
    pub heartbeat_topic: Option<String>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            team_id: vision_core::DEFAULT_TEAM_ID.to_string(),
            primary_topic: None,
            heartbeat_topic: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub bus: BusSection,
    pub relay: RelaySection,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid config file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay.team_id.trim().is_empty() {
            anyhow::bail!("relay.team_id must not be empty");
        }
        if self.bus.qos > 2 {
            anyhow::bail!("bus.qos must be 0, 1 or 2 (got {})", self.bus.qos);
        }
        if self.bus.channel_capacity == 0 {
            anyhow::bail!("bus.channel_capacity must be at least 1");
        }
        if self.server.outbound_buffer == 0 {
            anyhow::bail!("server.outbound_buffer must be at least 1");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn channels(&self) -> Channels {
        let defaults = Channels::for_team(&self.relay.team_id);
        Channels::new(
            self.relay
                .primary_topic
                .clone()
                .unwrap_or(defaults.primary),
            self.relay
                .heartbeat_topic
                .clone()
                .unwrap_or(defaults.heartbeat),
        )
    }

    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: self.server.max_message_size,
            outbound_buffer: self.server.outbound_buffer,
            send_timeout: Duration::from_millis(self.server.send_timeout_ms),
            handshake_timeout: Duration::from_secs(self.server.handshake_timeout_secs),
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            team_id: self.relay.team_id.clone(),
            channels: self.channels(),
            websocket: self.websocket_config(),
        }
    }

    pub fn bridge_config(&self) -> MqttBridgeConfig {
        let defaults = MqttBridgeConfig::default();
        MqttBridgeConfig {
            broker_host: self.bus.host.clone(),
            broker_port: self.bus.port,
            client_id: self.bus.client_id.clone().unwrap_or(defaults.client_id),
            username: self.bus.username.clone(),
            password: self.bus.password.clone(),
            subscribe_topics: self.channels().topics().iter().map(|t| t.to_string()).collect(),
            qos: self.bus.qos,
            keep_alive_secs: self.bus.keep_alive_secs,
            channel_capacity: self.bus.channel_capacity,
            connect_timeout_secs: self.bus.connect_timeout_secs,
            reconnect_delay_secs: self.bus.reconnect_delay_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:9002");
        assert_eq!(config.bus.host, "localhost");
        assert_eq!(config.bus.port, 1883);
        assert_eq!(config.bus.keep_alive_secs, 60);
        assert_eq!(config.relay.team_id, "sudoers");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml(
            r#"
            [bus]
            host = "10.0.0.5"
            username = "relay"
            password = "secret"

            [relay]
            team_id = "otters"
            "#,
        )
        .unwrap();

        assert_eq!(config.server, ServerSection::default());
        assert_eq!(config.bus.host, "10.0.0.5");
        assert_eq!(config.bus.port, 1883);

        let bridge = config.bridge_config();
        assert_eq!(bridge.username.as_deref(), Some("relay"));
        assert_eq!(
            bridge.subscribe_topics,
            vec!["vision/otters/movement", "vision/otters/heartbeat"]
        );
        assert!(bridge.client_id.starts_with("vision-relay-"));

        let relay = config.relay_config();
        assert_eq!(relay.team_id, "otters");
        assert_eq!(relay.channels.primary, "vision/otters/movement");
    }

    #[test]
    fn test_topic_overrides() {
        let config = Config::from_toml(
            r#"
            [relay]
            primary_topic = "lab/servo"
            "#,
        )
        .unwrap();

        let channels = config.channels();
        assert_eq!(channels.primary, "lab/servo");
        assert_eq!(channels.heartbeat, "vision/sudoers/heartbeat");
    }

    #[test]
    fn test_websocket_settings() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9100
            send_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr(), "0.0.0.0:9100");
        let ws = config.websocket_config();
        assert_eq!(ws.send_timeout, Duration::from_millis(500));
        assert_eq!(ws.outbound_buffer, 64);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.bus.qos = 3;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.relay.team_id = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wrong_value_type_is_error() {
        assert!(Config::from_toml("[server]\nport = \"nine\"").is_err());
    }
}
