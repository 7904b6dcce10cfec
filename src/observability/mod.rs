//! Observability: structured logging and session metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{MetricsSnapshot, SessionMetrics};

// Span macros for structured logging
pub use logging::{monitor_span, publish_span, session_span};
