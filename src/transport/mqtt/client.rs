//! Impure I/O operations for the MQTT client
//!
//! Each connection gets its own rumqttc client and event loop. A spawned pump task
//! polls the event loop, signals readiness once the broker acknowledges the
//! connection, and forwards routed events to the controller's sink. The pump never
//! lets rumqttc retry on its own: the first connection error after the
//! acknowledgement is reported as `Disconnected` and the pump exits, so every
//! reconnect is an explicit decision of the controller.

use super::connection::{configure_mqtt_options, qos_from_level, MqttError, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{route_mqtt_event, EventRoute};
use crate::config::SessionConfig;
use crate::transport::{EventSink, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `disconnect` waits for the pump to flush the disconnect packet
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type ReadySender = oneshot::Sender<Result<(), MqttError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// rumqttc-backed [`Transport`]
pub struct MqttClient {
    config: SessionConfig,
    client: Mutex<Option<AsyncClient>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
    sink: Mutex<Option<EventSink>>,
    shutdown_tx: watch::Sender<bool>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

impl MqttClient {
    pub fn new(config: SessionConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            client: Mutex::new(None),
            pump_handle: Mutex::new(None),
            sink: Mutex::new(None),
            shutdown_tx,
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open a fresh connection and wait for the broker's acknowledgement
    async fn establish(&self, sink: EventSink) -> Result<(), MqttError> {
        self.abort_pump();

        let options = configure_mqtt_options(&self.config);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        // Usable before the pump forwards `Connected`; requests queue until then
        *lock(&self.client) = Some(client);

        self.closing.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let (ready_tx, ready_rx) = oneshot::channel();

        info!(broker = %self.config.broker, "Connecting to MQTT broker");
        let handle = tokio::spawn(run_event_loop(
            event_loop,
            sink,
            ready_tx,
            shutdown_rx,
            self.connected.clone(),
            self.closing.clone(),
        ));

        let outcome = match tokio::time::timeout(self.config.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MqttError::ConnectionFailed(
                "event loop ended before the broker answered".to_string(),
            )),
            Err(_) => Err(MqttError::ConnectTimeout(self.config.connect_timeout)),
        };

        match outcome {
            Ok(()) => {
                *lock(&self.pump_handle) = Some(handle);
                info!(broker = %self.config.broker, "Connected to MQTT broker");
                Ok(())
            }
            Err(e) => {
                handle.abort();
                *lock(&self.client) = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn abort_pump(&self) {
        if let Some(handle) = lock(&self.pump_handle).take() {
            handle.abort();
        }
    }

    fn current_client(&self) -> Result<AsyncClient, MqttError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MqttError::NotConnected);
        }
        lock(&self.client).clone().ok_or(MqttError::NotConnected)
    }
}

/// Poll the event loop until shutdown, a connection error, or the sink closes
async fn run_event_loop(
    mut event_loop: EventLoop,
    sink: EventSink,
    ready_tx: ReadySender,
    mut shutdown_rx: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    let mut ready_tx = Some(ready_tx);

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Shutdown signal received, stopping MQTT event loop");
                    break;
                }
            }

            polled = event_loop.poll() => match polled {
                Ok(event) => {
                    let route = route_mqtt_event(&event);
                    match &route {
                        EventRoute::ConnectionAcknowledged => {
                            connected.store(true, Ordering::SeqCst);
                            if let Some(tx) = ready_tx.take() {
                                let _ = tx.send(Ok(()));
                            }
                        }
                        EventRoute::ConnectionRefused(reason) => {
                            if let Some(tx) = ready_tx.take() {
                                let _ = tx.send(Err(MqttError::ConnectionRefused(reason.clone())));
                                break;
                            }
                        }
                        EventRoute::Disconnected(reason) => {
                            connected.store(false, Ordering::SeqCst);
                            warn!(reason = %reason, "Broker closed the connection");
                        }
                        _ => {}
                    }

                    let terminal = matches!(route, EventRoute::Disconnected(_));
                    if let Some(event) = route.into_transport_event() {
                        if sink.send(event).await.is_err() {
                            debug!("Event sink closed, stopping MQTT event loop");
                            break;
                        }
                    }
                    if terminal {
                        break;
                    }
                }
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    let reason = e.to_string();
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(MqttError::ConnectionFailed(reason)));
                    } else if !closing.load(Ordering::SeqCst) {
                        error!(error = %reason, "MQTT connection lost");
                        let _ = sink.send(TransportEvent::Disconnected { reason }).await;
                    }
                    break;
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    debug!("MQTT event loop stopped");
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&self, events: EventSink) -> Result<(), Self::Error> {
        *lock(&self.sink) = Some(events.clone());
        self.establish(events).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), Self::Error> {
        let client = self.current_client()?;
        client
            .publish(topic, qos_from_level(self.config.qos), retain, payload)
            .await
            .map_err(MqttError::PublishFailed)?;
        debug!(topic = %topic, retain = retain, "Queued publish");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        let client = self.current_client()?;
        client
            .subscribe(topic, qos_from_level(self.config.qos))
            .await
            .map_err(MqttError::SubscriptionFailed)?;
        info!(topic = %topic, "Subscribed");
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), Self::Error> {
        let sink = lock(&self.sink).clone().ok_or(MqttError::NotConnected)?;
        *lock(&self.client) = None;
        self.establish(sink).await
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.closing.store(true, Ordering::SeqCst);
        let client = lock(&self.client).take();
        let handle = lock(&self.pump_handle).take();

        let result = match client {
            Some(client) if self.connected.load(Ordering::SeqCst) => client
                .disconnect()
                .await
                .map_err(MqttError::DisconnectFailed),
            _ => {
                // No disconnect packet will reach the pump, stop it directly
                self.shutdown_tx.send_replace(true);
                Ok(())
            }
        };

        if let Some(mut handle) = handle {
            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    self.shutdown_tx.send_replace(true);
                    handle.abort();
                }
            }
        }

        self.shutdown_tx.send_replace(true);
        self.connected.store(false, Ordering::SeqCst);
        info!("MQTT client disconnected");
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        self.abort_pump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerAddress;
    use crate::transport::transport_event_channel;

    fn unreachable_config() -> SessionConfig {
        // Port 1 on loopback refuses connections immediately
        let mut config = SessionConfig::new(
            BrokerAddress::parse("mqtt://127.0.0.1:1").unwrap(),
            "telemetrix/stream",
            "status/esp32",
        );
        config.connect_timeout = Duration::from_secs(2);
        config
    }

    #[tokio::test]
    async fn test_operations_fail_without_connection() {
        let client = MqttClient::new(unreachable_config());
        assert!(!client.is_connected());

        assert!(matches!(
            client.publish("telemetrix/stream", b"hi".to_vec(), false).await,
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            client.subscribe("status/esp32").await,
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            client.reconnect().await,
            Err(MqttError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let client = MqttClient::new(unreachable_config());
        assert!(client.disconnect().await.is_ok());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let client = MqttClient::new(unreachable_config());
        let (events, _rx) = transport_event_channel();

        let result = client.connect(events).await;
        assert!(matches!(
            result,
            Err(MqttError::ConnectionFailed(_)) | Err(MqttError::ConnectTimeout(_))
        ));
        assert!(!client.is_connected());
    }
}
