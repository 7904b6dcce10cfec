//! Thread-safe session metrics
//!
//! Counters are plain atomics owned by each controller rather than a process-wide
//! static, so concurrently running sessions (and tests) never share counts.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomic counters for one broker session
#[derive(Debug)]
pub struct SessionMetrics {
    messages_sent: AtomicU64,
    messages_failed: AtomicU64,
    messages_acknowledged: AtomicU64,
    messages_truncated: AtomicU64,
    heartbeats_received: AtomicU64,
    offline_alerts: AtomicU64,
    disconnects: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnect_failures: AtomicU64,
    connected: AtomicBool,
    last_heartbeat_unix: AtomicU64,
    started_at_unix: AtomicU64,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            messages_acknowledged: AtomicU64::new(0),
            messages_truncated: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
            offline_alerts: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnect_failures: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            last_heartbeat_unix: AtomicU64::new(0),
            started_at_unix: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_acknowledged(&self) {
        self.messages_acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_truncated(&self) {
        self.messages_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
        self.last_heartbeat_unix
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn offline_alert(&self) {
        self.offline_alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn reconnect_attempted(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_failed(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let last_heartbeat = self.last_heartbeat_unix.load(Ordering::Relaxed);

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at_unix.load(Ordering::Relaxed)),
            connected: self.connected.load(Ordering::Relaxed),
            messages: MessageMetrics {
                sent: self.messages_sent.load(Ordering::Relaxed),
                failed: self.messages_failed.load(Ordering::Relaxed),
                acknowledged: self.messages_acknowledged.load(Ordering::Relaxed),
                truncated: self.messages_truncated.load(Ordering::Relaxed),
            },
            liveness: LivenessMetrics {
                heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
                offline_alerts: self.offline_alerts.load(Ordering::Relaxed),
                last_heartbeat_unix: (last_heartbeat > 0).then_some(last_heartbeat),
            },
            connection: ConnectionMetrics {
                disconnects: self.disconnects.load(Ordering::Relaxed),
                reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
                reconnect_failures: self.reconnect_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Point-in-time view of [`SessionMetrics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub connected: bool,
    pub messages: MessageMetrics,
    pub liveness: LivenessMetrics,
    pub connection: ConnectionMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageMetrics {
    pub sent: u64,
    pub failed: u64,
    pub acknowledged: u64,
    pub truncated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivenessMetrics {
    pub heartbeats_received: u64,
    pub offline_alerts: u64,
    pub last_heartbeat_unix: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMetrics {
    pub disconnects: u64,
    pub reconnect_attempts: u64,
    pub reconnect_failures: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
