//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] and a fixed wall clock so the session can be
//! exercised without an MQTT broker.

use crate::clock::Clock;
use crate::transport::{EventSink, Transport, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Error returned by [`MockTransport`] when a failure is switched on
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Mock {operation} failure")]
pub struct MockTransportError {
    pub operation: &'static str,
}

impl MockTransportError {
    fn new(operation: &'static str) -> Self {
        Self { operation }
    }
}

/// A publish recorded by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    sink: Mutex<Option<EventSink>>,
    connected: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_publish: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_reconnect: AtomicBool,
    pub fail_disconnect: AtomicBool,
    /// Connect and reconnect succeed without emitting `Connected`
    pub suppress_connack: AtomicBool,
    /// `connect` emits `Connected` before its client is usable and returns only
    /// after a subscribe has been rejected for it
    pub late_client: AtomicBool,
    client_pending: AtomicBool,
    subscribe_rejected: Notify,
    pub subscribe_rejections: AtomicUsize,
    /// Time `reconnect` takes before it succeeds
    pub reconnect_latency_ms: AtomicU64,
    pub connect_calls: AtomicUsize,
    pub reconnect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub publish_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose initial connect fails
    pub fn with_failure() -> Self {
        let mock = Self::default();
        mock.fail_connect.store(true, Ordering::SeqCst);
        mock
    }

    /// Mock whose connection confirmation races ahead of `connect` returning
    pub fn with_late_client() -> Self {
        let mock = Self::default();
        mock.late_client.store(true, Ordering::SeqCst);
        mock
    }

    pub fn set_reconnect_latency(&self, latency: Duration) {
        self.reconnect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn subscribe_rejections(&self) -> usize {
        self.subscribe_rejections.load(Ordering::SeqCst)
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reconnect(&self, fail: bool) {
        self.fail_reconnect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn reconnect_calls(&self) -> usize {
        self.reconnect_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
        self.subscriptions.lock().await.clear();
    }

    /// Deliver an event to the controller as if it came from the broker
    pub async fn emit(&self, event: TransportEvent) -> bool {
        if matches!(event, TransportEvent::Disconnected { .. }) {
            self.connected.store(false, Ordering::SeqCst);
        }
        let sink = self.sink.lock().await.clone();
        match sink {
            Some(sink) => sink.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Simulate an inbound message
    pub async fn deliver(&self, topic: &str, payload: &str) -> bool {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        })
        .await
    }

    /// Simulate the broker dropping the connection
    pub async fn drop_connection(&self, reason: &str) -> bool {
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await
    }

    async fn acknowledge_connection(&self) {
        self.connected.store(true, Ordering::SeqCst);
        if !self.suppress_connack.load(Ordering::SeqCst) {
            self.emit(TransportEvent::Connected).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&self, events: EventSink) -> Result<(), Self::Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MockTransportError::new("connect"));
        }
        *self.sink.lock().await = Some(events);

        let late = self.late_client.load(Ordering::SeqCst);
        self.client_pending.store(late, Ordering::SeqCst);
        self.acknowledge_connection().await;
        if late {
            let _ = tokio::time::timeout(
                Duration::from_secs(1),
                self.subscribe_rejected.notified(),
            )
            .await;
            self.client_pending.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), Self::Error> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MockTransportError::new("publish"));
        }

        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).to_string(),
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MockTransportError::new("subscribe"));
        }
        if self.client_pending.load(Ordering::SeqCst) {
            self.subscribe_rejections.fetch_add(1, Ordering::SeqCst);
            self.subscribe_rejected.notify_one();
            return Err(MockTransportError::new("subscribe"));
        }
        self.subscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), Self::Error> {
        self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnect.load(Ordering::SeqCst) {
            return Err(MockTransportError::new("reconnect"));
        }
        let latency = self.reconnect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.acknowledge_connection().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(MockTransportError::new("disconnect"));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Clock with tokio monotonic time and a fixed wall-clock reading
#[derive(Debug, Clone)]
pub struct FixedWallClock {
    pub wall: DateTime<Local>,
}

impl FixedWallClock {
    pub fn new(wall: DateTime<Local>) -> Self {
        Self { wall }
    }

    /// 17 Oct 2026 14:03:55 local time
    pub fn sample() -> Self {
        let wall = Local
            .with_ymd_and_hms(2026, 10, 17, 14, 3, 55)
            .single()
            .unwrap_or_else(Local::now);
        Self::new(wall)
    }
}

impl Clock for FixedWallClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> DateTime<Local> {
        self.wall
    }
}
