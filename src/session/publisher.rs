//! Publish coordinator
//!
//! Sends are serialized: each one truncates the text, stamps it, publishes it on
//! the outbound topic, reports whether the peer looked stale, and then holds the
//! send lock for the pacing delay so the device display is never flooded.

use crate::clock::{format_stamp, Clock};
use crate::config::SessionConfig;
use crate::error::sanitize_error_message;
use crate::liveness::LivenessTracker;
use crate::observability::SessionMetrics;
use crate::publish_span;
use crate::transport::Transport;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Separator between the stamp and the text, as the device display expects
pub const STAMP_SEPARATOR: &str = "   ";

/// Result of one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport accepted the message; `peer_stale` reports the peer's liveness
    /// at the time of the send
    Sent { peer_stale: bool },
    /// The transport rejected the message; it is not retried
    Failed { reason: String },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// Cut `text` to at most `max_chars` characters
///
/// Returns the kept prefix and whether anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

/// A stamped operator message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub timestamp: DateTime<Local>,
    pub text: String,
    pub truncated: bool,
}

impl OutboundMessage {
    pub fn new(timestamp: DateTime<Local>, text: &str, max_chars: usize) -> Self {
        let (kept, truncated) = truncate_chars(text, max_chars);
        Self {
            timestamp,
            text: kept.to_string(),
            truncated,
        }
    }

    /// Wire payload: `"<dd Mon yy HH:MM:SS>   <text>"`
    pub fn payload(&self) -> String {
        format!(
            "{}{STAMP_SEPARATOR}{}",
            format_stamp(&self.timestamp),
            self.text
        )
    }
}

/// Serializes operator sends over a shared transport
pub struct Publisher<T: Transport> {
    config: Arc<SessionConfig>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    liveness: Arc<LivenessTracker>,
    metrics: Arc<SessionMetrics>,
    send_lock: Arc<Mutex<()>>,
}

impl<T: Transport> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            liveness: self.liveness.clone(),
            metrics: self.metrics.clone(),
            send_lock: self.send_lock.clone(),
        }
    }
}

impl<T: Transport> Publisher<T> {
    pub fn new(
        config: Arc<SessionConfig>,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
        liveness: Arc<LivenessTracker>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            config,
            transport,
            clock,
            liveness,
            metrics,
            send_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Publish one operator message
    ///
    /// `now` is the monotonic time used for the staleness check.
    pub async fn send(&self, text: &str, now: Instant) -> SendOutcome {
        let _guard = self.send_lock.lock().await;

        let message = OutboundMessage::new(
            self.clock.wall_time(),
            text,
            self.config.max_payload_chars,
        );
        if message.truncated {
            self.metrics.message_truncated();
            debug!(
                max_chars = self.config.max_payload_chars,
                "Message truncated to the payload limit"
            );
        }

        let topic = &self.config.outbound_topic;
        let span = publish_span!(topic = %topic, chars = message.text.chars().count());
        let result = self
            .transport
            .publish(topic, message.payload().into_bytes(), self.config.retain)
            .instrument(span)
            .await;

        let outcome = match result {
            Ok(()) => {
                self.metrics.message_sent();
                let peer_stale = self
                    .liveness
                    .is_stale(now, self.config.heartbeat_timeout);
                if peer_stale {
                    warn!(
                        topic = %topic,
                        "Message sent but the peer appears offline: message retained for peer"
                    );
                } else {
                    info!(topic = %topic, "Message sent");
                }
                SendOutcome::Sent { peer_stale }
            }
            Err(e) => {
                self.metrics.message_failed();
                let reason = sanitize_error_message(&e.to_string());
                error!(topic = %topic, error = %reason, "Failed to send message");
                SendOutcome::Failed { reason }
            }
        };

        tokio::time::sleep(self.config.pacing).await;
        outcome
    }
}
