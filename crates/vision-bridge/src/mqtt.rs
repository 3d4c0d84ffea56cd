//! MQTT Bridge
//!
//! Subscribes to the relay's topics on an MQTT broker via rumqttc and
//! forwards every publish as a [`BusMessage`].

use crate::{Bridge, BridgeError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
    QoS as MqttQoS,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use vision_core::BusMessage;

/// MQTT Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttBridgeConfig {
    /// MQTT broker host
    pub broker_host: String,
    /// MQTT broker port
    pub broker_port: u16,
    /// Client ID for MQTT connection
    pub client_id: String,
    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,
    /// Topics to subscribe to
    #[serde(default)]
    pub subscribe_topics: Vec<String>,
    /// QoS level (0, 1, or 2)
    #[serde(default)]
    pub qos: u8,
    /// Keep alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// Messages buffered towards the relay before new ones are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// How long to wait for the first CONNACK at startup
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Pause between reconnect attempts after a connection error
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_keep_alive() -> u16 {
    60
}

fn default_channel_capacity() -> usize {
    256
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    5
}

/// Random client id, `vision-relay-xxxxxxxx`
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("vision-relay-{}", &id[..8])
}

impl Default for MqttBridgeConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: vision_core::DEFAULT_MQTT_PORT,
            client_id: generate_client_id(),
            username: None,
            password: None,
            subscribe_topics: vision_core::Channels::default()
                .topics()
                .iter()
                .map(|t| t.to_string())
                .collect(),
            qos: 0,
            keep_alive_secs: default_keep_alive(),
            channel_capacity: default_channel_capacity(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

/// MQTT Bridge implementation
pub struct MqttBridge {
    mqtt_config: MqttBridgeConfig,
    client: Option<AsyncClient>,
    running: Arc<Mutex<bool>>,
}

impl MqttBridge {
    /// Create a new MQTT bridge
    pub fn new(mqtt_config: MqttBridgeConfig) -> Self {
        Self {
            mqtt_config,
            client: None,
            running: Arc::new(Mutex::new(false)),
        }
    }

    pub fn mqtt_config(&self) -> &MqttBridgeConfig {
        &self.mqtt_config
    }

    /// Parse MQTT QoS level
    pub fn parse_qos(qos: u8) -> MqttQoS {
        match qos {
            0 => MqttQoS::AtMostOnce,
            1 => MqttQoS::AtLeastOnce,
            _ => MqttQoS::ExactlyOnce,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            &self.mqtt_config.client_id,
            &self.mqtt_config.broker_host,
            self.mqtt_config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(self.mqtt_config.keep_alive_secs as u64));

        if let (Some(user), Some(pass)) = (&self.mqtt_config.username, &self.mqtt_config.password) {
            options.set_credentials(user, pass);
        }
        options
    }

    /// Poll until the broker accepts the connection.
    async fn await_connack(eventloop: &mut EventLoop) -> Result<()> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(BridgeError::ConnectionFailed(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )))
                    };
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(BridgeError::ConnectionFailed(format!(
                        "broker refused connection: {:?}",
                        code
                    )));
                }
                Err(e) => return Err(BridgeError::ConnectionFailed(e.to_string())),
            }
        }
    }
}

/// Queue subscriptions without waiting on the event loop.
fn subscribe_all(client: &AsyncClient, topics: &[String], qos: MqttQoS) {
    for topic in topics {
        match client.try_subscribe(topic.as_str(), qos) {
            Ok(()) => info!("MQTT subscribed to: {}", topic),
            Err(e) => error!("MQTT subscribe to {} failed: {}", topic, e),
        }
    }
}

#[async_trait]
impl Bridge for MqttBridge {
    async fn start(&mut self) -> Result<mpsc::Receiver<BusMessage>> {
        if *self.running.lock() {
            return Err(BridgeError::Other("Bridge already running".to_string()));
        }

        let (client, mut eventloop) = AsyncClient::new(self.options(), 100);

        info!(
            "MQTT bridge connecting to {}:{}",
            self.mqtt_config.broker_host, self.mqtt_config.broker_port
        );

        let connect_timeout = Duration::from_secs(self.mqtt_config.connect_timeout_secs);
        tokio::time::timeout(connect_timeout, Self::await_connack(&mut eventloop))
            .await
            .map_err(|_| {
                BridgeError::ConnectionFailed(format!(
                    "no CONNACK from {}:{} within {:?}",
                    self.mqtt_config.broker_host, self.mqtt_config.broker_port, connect_timeout
                ))
            })??;

        info!(
            "MQTT broker connected on port {}",
            self.mqtt_config.broker_port
        );

        let qos = Self::parse_qos(self.mqtt_config.qos);
        let topics = self.mqtt_config.subscribe_topics.clone();
        subscribe_all(&client, &topics, qos);

        self.client = Some(client.clone());
        *self.running.lock() = true;

        let (tx, rx) = mpsc::channel(self.mqtt_config.channel_capacity.max(1));
        let running = self.running.clone();
        let reconnect_delay = Duration::from_secs(self.mqtt_config.reconnect_delay_secs);

        tokio::spawn(async move {
            loop {
                if !*running.lock() {
                    break;
                }

                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(
                            "MQTT received: {} ({} bytes)",
                            publish.topic,
                            publish.payload.len()
                        );

                        let msg = BusMessage::new(publish.topic, publish.payload);
                        match tx.try_send(msg) {
                            Ok(()) => {}
                            Err(TrySendError::Full(msg)) => {
                                warn!("Relay backlog full, dropping message on {}", msg.topic);
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean sessions lose subscriptions on reconnect
                        info!("MQTT reconnected to broker");
                        subscribe_all(&client, &topics, qos);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("MQTT disconnected from broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if !*running.lock() {
                            break;
                        }
                        error!("MQTT error: {}", e);
                        tokio::time::sleep(reconnect_delay).await;
                    }
                }
            }

            info!("MQTT event loop stopped");
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        *self.running.lock() = false;
        if let Some(client) = self.client.take() {
            let _ = client.disconnect().await;
        }
        info!("MQTT bridge stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = MqttBridgeConfig::default();
        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.qos, 0);
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(
            config.subscribe_topics,
            vec!["vision/sudoers/movement", "vision/sudoers/heartbeat"]
        );
    }

    #[test]
    fn test_client_id_format() {
        let id = generate_client_id();
        assert!(id.starts_with("vision-relay-"));
        assert_eq!(id.len(), "vision-relay-".len() + 8);
        assert_ne!(id, generate_client_id());
    }

    #[test]
    fn test_parse_qos() {
        assert_eq!(MqttBridge::parse_qos(0), MqttQoS::AtMostOnce);
        assert_eq!(MqttBridge::parse_qos(1), MqttQoS::AtLeastOnce);
        assert_eq!(MqttBridge::parse_qos(2), MqttQoS::ExactlyOnce);
        assert_eq!(MqttBridge::parse_qos(9), MqttQoS::ExactlyOnce);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: MqttBridgeConfig = serde_json::from_str(
            r#"{"broker_host":"10.0.0.5","broker_port":1884,"client_id":"relay"}"#,
        )
        .unwrap();
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.channel_capacity, 256);
        assert!(config.subscribe_topics.is_empty());
    }

    #[test]
    fn test_new_bridge_is_idle() {
        let bridge = MqttBridge::new(MqttBridgeConfig::default());
        assert!(!bridge.is_running());
        assert!(bridge.client.is_none());
    }
}
