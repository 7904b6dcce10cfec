//! Telemetrix - MQTT publisher with peer liveness tracking
//!
//! Publishes operator-entered text messages to an MQTT broker while watching a
//! remote peer (typically an embedded device) through its heartbeat/status topic.
//!
//! # Overview
//!
//! - [`liveness`] - guarded heartbeat state and the background heartbeat monitor
//! - [`session`] - connection controller (connect, disconnect, single reconnect) and
//!   the publish coordinator
//! - [`transport`] - transport abstraction plus the rumqttc-backed MQTT implementation
//! - [`console`] - the line-oriented operator loop
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use telemetrix::config::{BrokerAddress, SessionConfig};
//! use telemetrix::session::ConnectionController;
//! use telemetrix::transport::MqttTransport;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = BrokerAddress::parse("mqtts://broker.example.com:8883")?;
//! let config = SessionConfig::new(broker, "telemetrix/stream", "status/esp32");
//! let transport = MqttTransport::new(config.clone());
//!
//! let controller = ConnectionController::new(config, transport);
//! controller.start().await?;
//!
//! let outcome = controller
//!     .publisher()
//!     .send("hello device", controller.now())
//!     .await;
//! println!("{outcome:?}");
//!
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod liveness;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use config::{BrokerAddress, ConfigError, ConfigFile, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use events::SessionEvent;
pub use liveness::{HeartbeatMonitor, LivenessTracker};
pub use session::{ConnectionController, ConnectionState, Publisher, SendOutcome};
pub use transport::{Transport, TransportEvent};
