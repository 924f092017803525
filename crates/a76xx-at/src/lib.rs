//! SIMCom A76XX AT Transport Engine
//!
//! This crate drives the AT command dialect spoken by SIMCom A76XX cellular
//! modems over a single byte-oriented serial link. One stream carries three
//! kinds of traffic at once, and the engine keeps them apart:
//!
//! - **Command/response exchanges**: a command line terminated with `\r\n`,
//!   answered by text ending in `OK\r\n`, `ERROR\r\n` or a command-specific
//!   pattern.
//! - **Unsolicited result codes (URCs)**: notifications such as an inbound MQTT
//!   message that may appear in the middle of any response.
//! - **Raw transfers**: length-prefixed binary payloads (certificates, publish
//!   payloads, HTTP bodies) framed inside the text protocol by a prompt
//!   handshake.
//!
//! # Matching
//!
//! [`ModemSerial::wait`] consumes bytes one at a time into a [`RollingWindow`]
//! and tests its suffix after every byte. Registered [`UrcHandler`]s run first,
//! then up to three caller patterns in order, then `ERROR`, then `OK`.
//!
//! # Example
//!
//! ```rust,ignore
//! use a76xx_at::{AtChannel, ModemSerial, MatchOutcome};
//! use std::time::Duration;
//!
//! let mut modem = ModemSerial::new(transport);
//! modem.send("AT+CSQ")?;
//! let outcome = modem.wait(&["+CSQ: "], Duration::from_secs(1), true, true);
//! if outcome == MatchOutcome::MatchedPattern(1) {
//!     let rssi = modem.parse_int_clear(Duration::from_millis(500))?;
//! }
//! ```

mod channel;
mod config;
mod error;
mod framed;
mod modem;
mod queue;
mod stream;
mod transfer;
mod transport;
mod urc;
mod window;

pub mod mock;

pub use channel::*;
pub use config::*;
pub use error::*;
pub use framed::*;
pub use modem::*;
pub use queue::*;
pub use stream::*;
pub use transfer::*;
pub use transport::*;
pub use urc::*;
pub use window::*;
