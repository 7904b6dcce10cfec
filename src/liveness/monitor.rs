//! Background heartbeat monitor
//!
//! One monitor runs per connected session. It ticks every poll interval, stays
//! quiet during the grace period that follows its own start, and afterwards raises
//! exactly one offline alert per stale episode.

use super::tracker::{LivenessTracker, PeerTransition};
use crate::clock::Clock;
use crate::events::SessionEvent;
use crate::monitor_span;
use crate::observability::SessionMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

/// How long `stop` waits for the task before aborting it
const MONITOR_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Shortest tick period; `tokio::time::interval` rejects a zero period
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Timing parameters for the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub heartbeat_timeout: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &crate::config::SessionConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            grace_period: config.grace_period,
            heartbeat_timeout: config.heartbeat_timeout,
        }
    }
}

/// Outcome of a single monitor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still inside the grace period, nothing evaluated
    Grace,
    /// Evaluated, no edge
    Steady,
    /// Evaluated and crossed an edge
    Transition(PeerTransition),
}

/// Pure tick decision, separated from the task loop for testing
pub fn poll_once(
    tracker: &LivenessTracker,
    started: Instant,
    now: Instant,
    settings: &MonitorSettings,
) -> TickOutcome {
    if now.saturating_duration_since(started) < settings.grace_period {
        return TickOutcome::Grace;
    }
    match tracker.evaluate(now, settings.heartbeat_timeout) {
        Some(transition) => TickOutcome::Transition(transition),
        None => TickOutcome::Steady,
    }
}

/// Spawns monitor tasks
pub struct HeartbeatMonitor;

impl HeartbeatMonitor {
    /// Start a monitor for one connected session
    pub fn spawn(
        generation: u64,
        tracker: Arc<LivenessTracker>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
        events: broadcast::Sender<SessionEvent>,
        metrics: Arc<SessionMetrics>,
    ) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = monitor_span!(generation = generation);

        let handle = tokio::spawn(
            run_monitor(tracker, clock, settings, events, metrics, shutdown_rx).instrument(span),
        );

        debug!(generation, "Heartbeat monitor started");
        MonitorHandle {
            generation,
            shutdown_tx,
            handle: Some(handle),
        }
    }
}

async fn run_monitor(
    tracker: Arc<LivenessTracker>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    events: broadcast::Sender<SessionEvent>,
    metrics: Arc<SessionMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let started = clock.now();
    if settings.poll_interval < MIN_POLL_INTERVAL {
        warn!(
            configured_ms = settings.poll_interval.as_millis() as u64,
            "Poll interval too short, using {}ms",
            MIN_POLL_INTERVAL.as_millis()
        );
    }
    let mut ticker = tokio::time::interval(settings.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                match poll_once(&tracker, started, clock.now(), &settings) {
                    TickOutcome::Transition(PeerTransition::WentOffline) => {
                        warn!(
                            timeout_secs = settings.heartbeat_timeout.as_secs(),
                            "Peer heartbeat lost: no status message within the timeout, device appears offline"
                        );
                        metrics.offline_alert();
                        let _ = events.send(SessionEvent::PeerOffline);
                    }
                    TickOutcome::Transition(PeerTransition::CameBack) => {
                        info!("Peer heartbeat resumed, device back online");
                        let _ = events.send(SessionEvent::PeerOnline);
                    }
                    TickOutcome::Grace | TickOutcome::Steady => {}
                }
            }
        }
    }

    debug!("Heartbeat monitor stopped");
}

/// Handle to a running monitor; dropping it stops the task
#[derive(Debug)]
pub struct MonitorHandle {
    generation: u64,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the monitor and wait for its task to exit
    pub async fn stop(mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(MONITOR_STOP_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    generation = self.generation,
                    "Heartbeat monitor didn't stop in time, aborting"
                );
                handle.abort();
            }
        }
        debug!(generation = self.generation, "Heartbeat monitor joined");
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::events::{drain_events, event_channel};

    fn settings() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(20),
        }
    }

    #[test]
    fn test_poll_once_respects_grace() {
        let tracker = LivenessTracker::new();
        let started = Instant::now();

        assert_eq!(
            poll_once(&tracker, started, started + Duration::from_secs(9), &settings()),
            TickOutcome::Grace
        );
        assert_eq!(
            poll_once(&tracker, started, started + Duration::from_secs(10), &settings()),
            TickOutcome::Transition(PeerTransition::WentOffline)
        );
        assert_eq!(
            poll_once(&tracker, started, started + Duration::from_secs(15), &settings()),
            TickOutcome::Steady
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_prompt() {
        let (events, _rx) = event_channel();
        let handle = HeartbeatMonitor::spawn(
            7,
            Arc::new(LivenessTracker::new()),
            Arc::new(SystemClock),
            settings(),
            events,
            Arc::new(SessionMetrics::new()),
        );
        assert_eq!(handle.generation(), 7);
        assert!(!handle.is_finished());

        let before = Instant::now();
        handle.stop().await;
        assert!(Instant::now() - before < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_raised_once_per_episode() {
        let (events, mut rx) = event_channel();
        let tracker = Arc::new(LivenessTracker::new());
        let metrics = Arc::new(SessionMetrics::new());
        tracker.seed(Instant::now());

        let handle = HeartbeatMonitor::spawn(
            1,
            tracker.clone(),
            Arc::new(SystemClock),
            settings(),
            events,
            metrics.clone(),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.stop().await;

        assert_eq!(drain_events(&mut rx), vec![SessionEvent::PeerOffline]);
        assert_eq!(metrics.snapshot().liveness.offline_alerts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_is_clamped() {
        let (events, mut rx) = event_channel();
        let handle = HeartbeatMonitor::spawn(
            1,
            Arc::new(LivenessTracker::new()),
            Arc::new(SystemClock),
            MonitorSettings {
                poll_interval: Duration::ZERO,
                grace_period: Duration::ZERO,
                heartbeat_timeout: Duration::from_secs(1),
            },
            events,
            Arc::new(SessionMetrics::new()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert_eq!(drain_events(&mut rx), vec![SessionEvent::PeerOffline]);

        handle.stop().await;
    }
}
