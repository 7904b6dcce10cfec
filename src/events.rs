//! Session notifications broadcast to interested listeners
//!
//! The controller and heartbeat monitor log every notable transition through
//! `tracing`; the same transitions are published here so callers (and tests) can
//! react to them programmatically.

use tokio::sync::broadcast;

/// Capacity of the session event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notable session transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Broker connection confirmed and monitoring started
    Connected,
    /// Transport reported the connection as lost
    ConnectionLost { reason: String },
    /// The single automatic reconnect attempt succeeded
    Reconnected,
    /// The single automatic reconnect attempt failed; manual restart required
    ReconnectFailed { reason: String },
    /// Peer heartbeat went stale (edge-triggered, once per stale episode)
    PeerOffline,
    /// A fresh heartbeat arrived after an offline alert
    PeerOnline,
    /// Broker acknowledged a published message
    PublishAcknowledged { packet_id: u16 },
}

/// Create the broadcast channel used for session events
pub fn event_channel() -> (
    broadcast::Sender<SessionEvent>,
    broadcast::Receiver<SessionEvent>,
) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

/// Drain every event currently buffered in a receiver
///
/// Lagged notifications are skipped; the drain stops once the channel is empty.
pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => drained.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_events_collects_in_order() {
        let (tx, mut rx) = event_channel();
        tx.send(SessionEvent::Connected).unwrap();
        tx.send(SessionEvent::PeerOffline).unwrap();
        tx.send(SessionEvent::PeerOnline).unwrap();

        assert_eq!(
            drain_events(&mut rx),
            vec![
                SessionEvent::Connected,
                SessionEvent::PeerOffline,
                SessionEvent::PeerOnline
            ]
        );
        assert!(drain_events(&mut rx).is_empty());
    }

    #[test]
    fn test_send_without_listeners_is_harmless() {
        let (tx, rx) = event_channel();
        drop(rx);
        assert!(tx.send(SessionEvent::Reconnected).is_err());
    }
}
