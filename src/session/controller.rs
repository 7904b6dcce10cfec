//! Connection controller
//!
//! Owns the transport and drives the session lifecycle:
//!
//! 1. `start()` connects and spawns a dispatcher that feeds transport events into
//!    the `on_*` handlers.
//! 2. On every confirmed connection the status topic is subscribed, the liveness
//!    tracker is seeded and a fresh heartbeat monitor is spawned. The previous
//!    monitor is always stopped and joined first.
//! 3. When an established connection drops, the monitor is stopped and exactly one
//!    reconnect is attempted after `reconnect_delay`, unless `stop()` is in
//!    progress. A failed reconnect is final.
//! 4. `stop()` is idempotent and always leaves the session `Disconnected`.

use super::publisher::Publisher;
use super::state::{decide_reconnect, log_state_transition, ConnectionState, ReconnectDecision};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{sanitize_error_message, SessionError, SessionResult};
use crate::events::{event_channel, SessionEvent};
use crate::liveness::{HeartbeatMonitor, LivenessTracker, MonitorHandle, MonitorSettings};
use crate::observability::SessionMetrics;
use crate::session_span;
use crate::transport::{topic_matches, transport_event_channel, Transport, TransportEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// How long `stop()` waits for the dispatcher before aborting it
const DISPATCHER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ConnectionController<T: Transport> {
    config: Arc<SessionConfig>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    liveness: Arc<LivenessTracker>,
    metrics: Arc<SessionMetrics>,
    events_tx: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    monitor: Mutex<Option<MonitorHandle>>,
    generation: AtomicU64,
    status_subscribed: AtomicBool,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    shutdown_requested: AtomicBool,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    publisher: Publisher<T>,
}

impl<T: Transport> ConnectionController<T> {
    pub fn new(config: SessionConfig, transport: T) -> Arc<Self> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SessionConfig, transport: T, clock: Arc<dyn Clock>) -> Arc<Self> {
        let config = Arc::new(config);
        let transport = Arc::new(transport);
        let liveness = Arc::new(LivenessTracker::new());
        let metrics = Arc::new(SessionMetrics::new());
        let (events_tx, _) = event_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        let publisher = Publisher::new(
            config.clone(),
            transport.clone(),
            clock.clone(),
            liveness.clone(),
            metrics.clone(),
        );

        Arc::new(Self {
            config,
            transport,
            clock,
            liveness,
            metrics,
            events_tx,
            state_tx,
            monitor: Mutex::new(None),
            generation: AtomicU64::new(0),
            status_subscribed: AtomicBool::new(false),
            dispatcher: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            publisher,
        })
    }

    /// Connect to the broker and begin dispatching transport events
    ///
    /// A failed initial connect is fatal for the session.
    pub async fn start(self: &Arc<Self>) -> SessionResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SessionError::internal("session has already been stopped"));
        }

        self.set_state(ConnectionState::Connecting);
        self.running.store(true, Ordering::SeqCst);

        let (sink, rx) = transport_event_channel();
        let handle = tokio::spawn(dispatch_events(
            Arc::downgrade(self),
            rx,
            self.shutdown_tx.subscribe(),
        ));
        *self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        let span = session_span!(broker = %self.config.broker);
        match self.transport.connect(sink).instrument(span).await {
            Ok(()) => {
                self.on_connected().await;
                Ok(())
            }
            Err(e) => {
                let message = sanitize_error_message(&e.to_string());
                error!(broker = %self.config.broker, error = %message, "Initial connection failed");
                self.running.store(false, Ordering::SeqCst);
                self.set_state(ConnectionState::Disconnected);
                self.shutdown_tx.send_replace(true);
                self.join_dispatcher().await;
                Err(SessionError::connect(message))
            }
        }
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.on_connected().await;
            }
            TransportEvent::ConnectRefused { reason } => self.on_connect_refused(&reason),
            TransportEvent::Disconnected { reason } => self.on_disconnected(&reason).await,
            TransportEvent::Message { topic, payload } => {
                self.on_inbound_message(&topic, &payload, self.clock.now())
            }
            TransportEvent::PublishAcknowledged { packet_id } => self.on_publish_ack(packet_id),
        }
    }

    /// Handle a confirmed connection
    ///
    /// Returns false when the confirmation was a duplicate or arrived during stop.
    pub async fn on_connected(&self) -> bool {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            debug!("Connection confirmed during shutdown, ignoring");
            return false;
        }

        let mut slot = self.monitor.lock().await;
        let monitor_live = slot.as_ref().is_some_and(|m| !m.is_finished());
        if self.connection_state() == ConnectionState::Connected && monitor_live {
            if !self.status_subscribed.load(Ordering::SeqCst) {
                debug!("Repeated connection confirmation, retrying status subscription");
                self.subscribe_status_topic().await;
            } else {
                debug!("Duplicate connection confirmation ignored");
            }
            return false;
        }

        if let Some(previous) = slot.take() {
            previous.stop().await;
        }

        self.set_state(ConnectionState::Connected);
        self.metrics.connection_established();
        self.subscribe_status_topic().await;

        self.liveness.seed(self.clock.now());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(HeartbeatMonitor::spawn(
            generation,
            self.liveness.clone(),
            self.clock.clone(),
            MonitorSettings::from_config(&self.config),
            self.events_tx.clone(),
            self.metrics.clone(),
        ));
        drop(slot);

        info!(
            broker = %self.config.broker,
            status_topic = %self.config.status_topic,
            generation,
            "Connected, monitoring peer heartbeat"
        );
        let _ = self.events_tx.send(SessionEvent::Connected);
        true
    }

    /// Subscribe to the peer's status topic; a failure is reported and left for the
    /// next connection confirmation to retry
    async fn subscribe_status_topic(&self) {
        match self.transport.subscribe(&self.config.status_topic).await {
            Ok(()) => self.status_subscribed.store(true, Ordering::SeqCst),
            Err(e) => {
                self.status_subscribed.store(false, Ordering::SeqCst);
                error!(
                    topic = %self.config.status_topic,
                    error = %sanitize_error_message(&e.to_string()),
                    "Failed to subscribe to status topic; peer liveness cannot be observed"
                );
            }
        }
    }

    /// Broker refused the connection
    pub fn on_connect_refused(&self, reason: &str) {
        error!(reason = %sanitize_error_message(reason), "Broker refused the connection");
        self.set_state(ConnectionState::Disconnected);
    }

    /// Handle loss of an established connection
    pub async fn on_disconnected(&self, reason: &str) {
        let state = self.connection_state();
        if state != ConnectionState::Connected {
            debug!(state = %state, "Disconnect notification ignored");
            return;
        }

        self.stop_monitor().await;
        self.status_subscribed.store(false, Ordering::SeqCst);
        self.metrics.connection_lost();
        let reason = sanitize_error_message(reason);
        warn!(reason = %reason, "Connection to broker lost");
        let _ = self.events_tx.send(SessionEvent::ConnectionLost {
            reason: reason.clone(),
        });

        if decide_reconnect(self.shutdown_requested.load(Ordering::SeqCst))
            == ReconnectDecision::Suppress
        {
            info!("Session is stopping, not reconnecting");
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.set_state(ConnectionState::ReconnectPending);
        if !self.interruptible_sleep(self.config.reconnect_delay).await {
            info!("Stop requested during reconnect delay, not reconnecting");
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.metrics.reconnect_attempted();
        info!(broker = %self.config.broker, "Attempting to reconnect");
        match self.transport.reconnect().await {
            Ok(()) if self.shutdown_requested.load(Ordering::SeqCst) => {
                info!("Stop requested while reconnecting, closing the new connection");
                if let Err(e) = self.transport.disconnect().await {
                    warn!(
                        error = %sanitize_error_message(&e.to_string()),
                        "Failed to close connection opened during stop"
                    );
                }
            }
            Ok(()) => {
                if self.on_connected().await {
                    info!("Reconnected to broker");
                    let _ = self.events_tx.send(SessionEvent::Reconnected);
                }
            }
            Err(e) => {
                self.metrics.reconnect_failed();
                self.set_state(ConnectionState::Disconnected);
                let reason = sanitize_error_message(&e.to_string());
                error!(
                    error = %reason,
                    "Reconnect failed; no further attempts will be made, restart the session manually"
                );
                let _ = self.events_tx.send(SessionEvent::ReconnectFailed { reason });
            }
        }
    }

    /// Route an inbound message; only the status topic counts as a heartbeat
    pub fn on_inbound_message(&self, topic: &str, payload: &[u8], now: Instant) {
        if topic_matches(&self.config.status_topic, topic) {
            self.liveness.record_heartbeat(now);
            self.metrics.heartbeat_received();
            debug!(
                topic = %topic,
                payload = %String::from_utf8_lossy(payload),
                "Heartbeat received"
            );
        } else {
            debug!(topic = %topic, "Ignoring message on unrelated topic");
        }
    }

    pub fn on_publish_ack(&self, packet_id: u16) {
        debug!(packet_id, "Publish acknowledged by broker");
        self.metrics.message_acknowledged();
        let _ = self
            .events_tx
            .send(SessionEvent::PublishAcknowledged { packet_id });
    }

    /// Stop the session
    ///
    /// Safe to call repeatedly; only the first call does any work. A disconnect
    /// error is logged and returned, but the session still ends `Disconnected`.
    pub async fn stop(&self) -> SessionResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Session already stopped");
            return Ok(());
        }

        info!("Stopping session");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        self.stop_monitor().await;
        self.status_subscribed.store(false, Ordering::SeqCst);

        let result = self.transport.disconnect().await.map_err(|e| {
            let message = sanitize_error_message(&e.to_string());
            warn!(error = %message, "Disconnect from broker failed");
            SessionError::disconnect(message)
        });

        self.metrics.connection_closed();
        self.set_state(ConnectionState::Disconnected);
        self.join_dispatcher().await;

        info!("Session stopped");
        result
    }

    async fn stop_monitor(&self) {
        let previous = self.monitor.lock().await.take();
        if let Some(monitor) = previous {
            monitor.stop().await;
        }
    }

    async fn join_dispatcher(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut handle) = handle {
            if tokio::time::timeout(DISPATCHER_SHUTDOWN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!("Event dispatcher didn't shut down gracefully, forcing abort");
                handle.abort();
            }
        }
    }

    /// Sleep unless stop is requested first; returns true if the sleep completed
    async fn interruptible_sleep(&self, duration: Duration) -> bool {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return false;
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        log_state_transition(previous, state);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    pub fn publisher(&self) -> &Publisher<T> {
        &self.publisher
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current monotonic time from the session clock
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Generation of the most recently spawned heartbeat monitor (0 before the first)
    pub fn monitor_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl<T: Transport> Drop for ConnectionController<T> {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Feed transport events to the controller until shutdown or the sink closes
async fn dispatch_events<T: Transport>(
    controller: Weak<ConnectionController<T>>,
    mut rx: mpsc::Receiver<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }

            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.handle_transport_event(event).await;
    }

    debug!("Transport event dispatcher stopped");
}
