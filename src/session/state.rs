//! Pure connection state and reconnect policy

use std::fmt;
use tracing::info;

/// Connection lifecycle state, published through a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost, waiting to make the single reconnect attempt
    ReconnectPending,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectPending => "reconnect_pending",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do after the connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Attempt,
    Suppress,
}

/// A deliberate stop suppresses the reconnect
pub fn decide_reconnect(shutdown_requested: bool) -> ReconnectDecision {
    if shutdown_requested {
        ReconnectDecision::Suppress
    } else {
        ReconnectDecision::Attempt
    }
}

/// Log state transition
pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    if from != to {
        info!(from = %from, to = %to, "Connection state transition");
    }
}
