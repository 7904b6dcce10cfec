//! MQTT transport built on rumqttc
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - pure option building and error types
//! - [`message_handler`] - pure mapping of rumqttc events onto [`TransportEvent`]s
//! - [`client`] - the event loop pump and the [`Transport`] implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use telemetrix::config::{BrokerAddress, SessionConfig};
//! use telemetrix::transport::{transport_event_channel, Transport};
//! use telemetrix::transport::mqtt::MqttClient;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = BrokerAddress::parse("mqtt://localhost:1883")?;
//! let client = MqttClient::new(SessionConfig::new(broker, "telemetrix/stream", "status/esp32"));
//!
//! let (events, _rx) = transport_event_channel();
//! client.connect(events).await?;
//! client.subscribe("status/esp32").await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`TransportEvent`]: crate::transport::TransportEvent
//! [`Transport`]: crate::transport::Transport

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{configure_mqtt_options, qos_from_level, MqttError};
pub use message_handler::{route_mqtt_event, EventRoute};
