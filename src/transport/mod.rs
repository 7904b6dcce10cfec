//! Transport layer for the session
//!
//! This module provides the transport abstraction the session controller and
//! publisher depend on, and the rumqttc-backed MQTT implementation.

use bytes::Bytes;
use tokio::sync::mpsc;

pub mod mqtt;

/// Capacity of the transport-to-controller event channel
pub const TRANSPORT_EVENT_CAPACITY: usize = 64;

/// Connection-level notifications delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker confirmed the connection
    Connected,
    /// Broker refused the connection before it was established
    ConnectRefused { reason: String },
    /// An established connection was lost
    Disconnected { reason: String },
    /// Inbound message on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// Broker acknowledged one of our publishes
    PublishAcknowledged { packet_id: u16 },
}

/// Where a transport delivers its [`TransportEvent`]s
pub type EventSink = mpsc::Sender<TransportEvent>;

/// Create the channel a transport reports into
pub fn transport_event_channel() -> (EventSink, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(TRANSPORT_EVENT_CAPACITY)
}

/// MQTT topic filter matching (`+` matches one level, a trailing `#` matches the rest)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Transport trait for the session
///
/// This trait provides an abstraction over the broker connection so the controller
/// can be driven by a mock in tests. All methods take `&self`; implementations use
/// interior mutability so one transport can be shared between the controller, the
/// publisher and the dispatcher task.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker; returns once the connection is confirmed.
    /// Subsequent connection events are delivered to `events`.
    async fn connect(&self, events: EventSink) -> Result<(), Self::Error>;

    /// Publish a payload to a concrete topic
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), Self::Error>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Re-establish a lost connection, once
    async fn reconnect(&self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
