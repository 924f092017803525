//! A76XX command-line tool
//!
//! Drives a SIMCom A76XX modem whose serial port is bridged to TCP. The
//! subcommands are thin wrappers over [`a76xx_client`] so they can be tested
//! against a [`MockTransport`](a76xx_at::mock::MockTransport).

pub mod commands;
pub mod config;
pub mod error;
pub mod transport;

pub use config::AppConfig;
pub use error::{CliError, CliResult};
pub use transport::TcpTransport;
