//! Broker session: lifecycle control and publishing

pub mod controller;
pub mod publisher;
pub mod state;

pub use controller::ConnectionController;
pub use publisher::{truncate_chars, OutboundMessage, Publisher, SendOutcome};
pub use state::{decide_reconnect, ConnectionState, ReconnectDecision};
