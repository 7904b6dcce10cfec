//! Time sources
//!
//! Liveness arithmetic runs on tokio's monotonic [`Instant`] so tests can pause and
//! advance time. Outbound payloads are stamped with local wall-clock time.

use chrono::{DateTime, Local};
use tokio::time::Instant;

/// Stamp format expected by the device display, e.g. `17 Oct 26 14:03:55`
pub const PAYLOAD_TIMESTAMP_FORMAT: &str = "%d %b %y %H:%M:%S";

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync {
    /// Monotonic time used for heartbeat and grace-period arithmetic
    fn now(&self) -> Instant;

    /// Local wall-clock time used to stamp outbound messages
    fn wall_time(&self) -> DateTime<Local>;
}

/// Clock backed by tokio time and the system wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Render a wall-clock time in the payload stamp format
pub fn format_stamp(at: &DateTime<Local>) -> String {
    at.format(PAYLOAD_TIMESTAMP_FORMAT).to_string()
}
