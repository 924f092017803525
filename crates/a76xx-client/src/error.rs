//! Client error types.

use a76xx_at::AtError;
use thiserror::Error;

/// Errors returned by the client façades and command sets.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Engine-level failure (timeout, device error, transfer problem).
    #[error(transparent)]
    At(#[from] AtError),

    /// `AT+CMQTTSTART` reported the service was already running.
    #[error("MQTT service already started")]
    MqttAlreadyStarted,

    /// `AT+CMQTTSTOP` reported the service was not running.
    #[error("MQTT service already stopped")]
    MqttAlreadyStopped,

    /// The HTTP request completed with a status outside 2xx.
    #[error("HTTP request failed with status {0}")]
    HttpStatus(u16),

    /// The combined custom headers would exceed the modem's limit.
    #[error("HTTP headers exceed {max} bytes")]
    HeaderTooLong {
        /// Limit imposed by the firmware.
        max: usize,
    },

    /// A caller-supplied value cannot be encoded into the command.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Whether the error came from a deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::At(e) if e.is_timeout())
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
