//! SIMCom A76XX Service Clients
//!
//! Command sets and façades for the modem's built-in services, layered on the
//! [`a76xx_at`] engine. Every command set borrows a `&mut dyn AtChannel`, so
//! the same code runs against a serial port, a TCP bridge or a
//! [`MockTransport`](a76xx_at::mock::MockTransport).
//!
//! - [`ssl`]: certificate storage and SSL context configuration.
//! - [`socket`]: SSL/TCP client sockets.
//! - [`mqtt`]: MQTT(S) client with an inbound message inbox.
//! - [`http`]: HTTP(S) requests with custom headers.
//! - [`gnss`]: receiver control and the NMEA sentence stream.
//!
//! Façades that register URC handlers remove them again when dropped.

mod error;
mod session;

pub mod gnss;
pub mod http;
pub mod mqtt;
pub mod socket;
pub mod ssl;

pub use error::*;
pub use session::*;

pub use gnss::{GnssStream, NmeaSentence};
pub use http::HttpClient;
pub use mqtt::{MqttClient, MqttMessage, MqttOptions};
pub use socket::SecureSocket;
pub use ssl::{ClientSlots, DataMode, SecureContext, SslSettings};
