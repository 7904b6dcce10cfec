//! Peer liveness state
//!
//! The transport event path records heartbeats while the heartbeat monitor and the
//! publisher read staleness; both the timestamp and the alert flag live behind one
//! mutex so an evaluation never sees a torn pair.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of the guarded liveness state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessState {
    /// Time of the last heartbeat; `None` is infinitely stale
    pub last_heartbeat: Option<Instant>,
    /// Set while an offline alert has been raised for the current stale episode
    pub offline_alert_active: bool,
}

/// Edge reported by [`LivenessTracker::evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTransition {
    WentOffline,
    CameBack,
}

/// Pure staleness rule. Exactly `timeout` since the last heartbeat is still fresh.
pub fn heartbeat_expired(last_heartbeat: Option<Instant>, now: Instant, timeout: Duration) -> bool {
    match last_heartbeat {
        None => true,
        Some(last) => now.saturating_duration_since(last) > timeout,
    }
}

/// Guarded liveness state shared between the session paths
#[derive(Debug, Default)]
pub struct LivenessTracker {
    state: Mutex<LivenessState>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, LivenessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a heartbeat from the peer
    pub fn record_heartbeat(&self, now: Instant) {
        self.guard().last_heartbeat = Some(now);
    }

    /// Start of a connected session: treat the peer as just heard from
    pub fn seed(&self, now: Instant) {
        let mut state = self.guard();
        state.last_heartbeat = Some(now);
        state.offline_alert_active = false;
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        heartbeat_expired(self.guard().last_heartbeat, now, timeout)
    }

    /// Compare staleness against the alert flag and flip it on an edge
    pub fn evaluate(&self, now: Instant, timeout: Duration) -> Option<PeerTransition> {
        let mut state = self.guard();
        let stale = heartbeat_expired(state.last_heartbeat, now, timeout);

        match (stale, state.offline_alert_active) {
            (true, false) => {
                state.offline_alert_active = true;
                Some(PeerTransition::WentOffline)
            }
            (false, true) => {
                state.offline_alert_active = false;
                Some(PeerTransition::CameBack)
            }
            _ => None,
        }
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.guard().last_heartbeat
    }

    pub fn snapshot(&self) -> LivenessState {
        *self.guard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TIMEOUT: Duration = Duration::from_secs(20);

    #[test]
    fn test_no_heartbeat_is_stale() {
        let tracker = LivenessTracker::new();
        assert!(tracker.is_stale(Instant::now(), TIMEOUT));
        assert_eq!(tracker.last_heartbeat(), None);
    }

    #[test]
    fn test_staleness_boundary() {
        let base = Instant::now();
        let tracker = LivenessTracker::new();
        tracker.record_heartbeat(base);

        assert!(!tracker.is_stale(base + Duration::from_secs(19), TIMEOUT));
        assert!(!tracker.is_stale(base + TIMEOUT, TIMEOUT));
        assert!(tracker.is_stale(base + TIMEOUT + Duration::from_millis(1), TIMEOUT));
    }

    #[test]
    fn test_now_before_heartbeat_is_fresh() {
        let base = Instant::now();
        assert!(!heartbeat_expired(
            Some(base + Duration::from_secs(5)),
            base,
            TIMEOUT
        ));
    }

    #[test]
    fn test_evaluate_is_edge_triggered() {
        let base = Instant::now();
        let tracker = LivenessTracker::new();
        tracker.seed(base);

        assert_eq!(tracker.evaluate(base + Duration::from_secs(10), TIMEOUT), None);
        assert_eq!(
            tracker.evaluate(base + Duration::from_secs(25), TIMEOUT),
            Some(PeerTransition::WentOffline)
        );
        // Still stale, already alerted
        assert_eq!(tracker.evaluate(base + Duration::from_secs(30), TIMEOUT), None);
        assert_eq!(tracker.evaluate(base + Duration::from_secs(60), TIMEOUT), None);

        tracker.record_heartbeat(base + Duration::from_secs(61));
        assert_eq!(
            tracker.evaluate(base + Duration::from_secs(62), TIMEOUT),
            Some(PeerTransition::CameBack)
        );
        assert!(!tracker.snapshot().offline_alert_active);
    }

    #[test]
    fn test_seed_clears_alert() {
        let base = Instant::now();
        let tracker = LivenessTracker::new();
        assert_eq!(
            tracker.evaluate(base, TIMEOUT),
            Some(PeerTransition::WentOffline)
        );

        tracker.seed(base + Duration::from_secs(1));
        assert_eq!(
            tracker.snapshot(),
            LivenessState {
                last_heartbeat: Some(base + Duration::from_secs(1)),
                offline_alert_active: false,
            }
        );
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let tracker = LivenessTracker::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = tracker.state.lock().unwrap();
            panic!("poison the tracker");
        }));

        let now = Instant::now();
        tracker.record_heartbeat(now);
        assert_eq!(tracker.last_heartbeat(), Some(now));
    }

    proptest! {
        #[test]
        fn prop_staleness_matches_elapsed(heartbeat_ms in 0u64..100_000, check_ms in 0u64..100_000) {
            let base = Instant::now();
            let tracker = LivenessTracker::new();
            tracker.record_heartbeat(base + Duration::from_millis(heartbeat_ms));

            let expected = check_ms > heartbeat_ms + TIMEOUT.as_millis() as u64;
            prop_assert_eq!(
                tracker.is_stale(base + Duration::from_millis(check_ms), TIMEOUT),
                expected
            );
        }

        #[test]
        fn prop_concurrent_records_never_tear(offsets in proptest::collection::vec(0u64..10_000, 1..32)) {
            let base = Instant::now();
            let tracker = LivenessTracker::new();
            let max_offset = *offsets.iter().max().unwrap();

            std::thread::scope(|scope| {
                for offset in &offsets {
                    let tracker = &tracker;
                    scope.spawn(move || {
                        tracker.record_heartbeat(base + Duration::from_millis(*offset));
                        let _ = tracker.is_stale(base + Duration::from_millis(max_offset), TIMEOUT);
                    });
                }
            });

            let recorded = tracker.last_heartbeat().unwrap();
            let recorded_offset = recorded.duration_since(base).as_millis() as u64;
            prop_assert!(offsets.contains(&recorded_offset));
            prop_assert!(!tracker.is_stale(base + Duration::from_millis(max_offset), TIMEOUT));
        }
    }
}
