//! MQTT connection settings

use std::time::Duration;

use rumqttc::MqttOptions;

/// Broker connection parameters, loaded once from the environment and
/// passed by value to whoever owns the connection.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    /// Root segment of every topic this deployment uses.
    pub namespace: String,
}

impl MqttSettings {
    /// Load settings from environment variables with local-dev defaults.
    pub fn from_env(client_id: impl Into<String>) -> Self {
        let host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("MQTT_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1883);
        let username = std::env::var("MQTT_USERNAME").unwrap_or_else(|_| "admin".to_string());
        let password = std::env::var("MQTT_PASSWORD").unwrap_or_else(|_| "public".to_string());
        let namespace = std::env::var("TOPIC_NAMESPACE").unwrap_or_else(|_| "bots".to_string());

        Self {
            host,
            port,
            username,
            password,
            client_id: client_id.into(),
            namespace,
        }
    }

    /// Build client options for the async MQTT client.
    pub fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.host, self.port);
        opts.set_credentials(&self.username, &self.password);
        opts.set_keep_alive(Duration::from_secs(60));
        opts
    }
}
