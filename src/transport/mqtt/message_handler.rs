//! Pure routing of rumqttc events
//!
//! The event loop pump hands every polled [`Event`] to [`route_mqtt_event`] and
//! forwards whatever [`EventRoute::into_transport_event`] yields.

use crate::transport::TransportEvent;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::Event;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Broker answered the connect with a failure code
    ConnectionRefused(String),
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker acknowledged a QoS 1 or QoS 2 publish
    PublishAcknowledged(u16),
    /// Broker sent a disconnect
    Disconnected(String),
    /// Subscription confirmed
    SubscriptionConfirmed(u16),
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent,
    /// Outgoing event (handled by rumqttc)
    OutgoingEvent,
}

impl EventRoute {
    /// Notification for the controller, if the route warrants one
    pub fn into_transport_event(self) -> Option<TransportEvent> {
        match self {
            EventRoute::ConnectionAcknowledged => Some(TransportEvent::Connected),
            EventRoute::ConnectionRefused(reason) => Some(TransportEvent::ConnectRefused { reason }),
            EventRoute::MessageReceived { topic, payload } => {
                Some(TransportEvent::Message { topic, payload })
            }
            EventRoute::PublishAcknowledged(packet_id) => {
                Some(TransportEvent::PublishAcknowledged { packet_id })
            }
            EventRoute::Disconnected(reason) => Some(TransportEvent::Disconnected { reason }),
            EventRoute::SubscriptionConfirmed(_)
            | EventRoute::InfrastructureEvent
            | EventRoute::OutgoingEvent => None,
        }
    }
}

/// Route MQTT event to the appropriate handler (pure routing decision)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(connack) => match connack.code {
                ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                code => EventRoute::ConnectionRefused(format!("{code:?}")),
            },
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
            },
            Packet::PubAck(puback) => EventRoute::PublishAcknowledged(puback.pkid),
            Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged(pubcomp.pkid),
            Packet::Disconnect(disconnect) => EventRoute::Disconnected(format!(
                "broker sent disconnect: {:?}",
                disconnect.reason_code
            )),
            Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed(suback.pkid),
            _ => EventRoute::InfrastructureEvent,
        },
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}
