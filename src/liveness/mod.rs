//! Peer liveness: guarded heartbeat state and the background monitor

pub mod monitor;
pub mod tracker;

pub use monitor::{poll_once, HeartbeatMonitor, MonitorHandle, MonitorSettings, TickOutcome};
pub use tracker::{heartbeat_expired, LivenessState, LivenessTracker, PeerTransition};
