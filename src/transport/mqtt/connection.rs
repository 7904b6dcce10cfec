//! Pure connection configuration for the MQTT client

use crate::config::SessionConfig;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use uuid::Uuid;

/// Requests buffered between the client handle and the event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection refused by broker: {0}")]
    ConnectionRefused(String),
    #[error("Timed out after {0:?} waiting for broker acknowledgement")]
    ConnectTimeout(std::time::Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] rumqttc::v5::ClientError),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] rumqttc::v5::ClientError),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] rumqttc::v5::ClientError),
    #[error("Not connected")]
    NotConnected,
}

/// Client id unique per connection attempt, so a reconnect never collides with a
/// session the broker still holds open
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Map a configured QoS level onto rumqttc's enum; out-of-range levels fall back
/// to at-least-once
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Pure function to configure MQTT options from the session config
pub fn configure_mqtt_options(config: &SessionConfig) -> MqttOptions {
    let client_id = generate_client_id(&config.client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, &config.broker.host, config.broker.port);

    if config.broker.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = &config.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_keep_alive(config.keep_alive);
    mqtt_options.set_clean_start(true);

    mqtt_options
}
