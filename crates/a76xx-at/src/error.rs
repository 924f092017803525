//! Error types for the AT engine.

use thiserror::Error;

/// Errors that can occur while talking to the modem.
///
/// Every engine operation returns these as values; nothing here is retried by
/// the engine itself.
#[derive(Debug, Error)]
pub enum AtError {
    /// No terminator or pattern matched before the deadline.
    #[error("timeout waiting for modem response")]
    TimedOut,

    /// The generic `ERROR` terminator matched.
    #[error("modem reported failure")]
    DeviceReportedFailure,

    /// A command-specific result line carried a non-zero error code.
    #[error("modem returned error code {0}")]
    DeviceCode(i32),

    /// A raw transfer did not move the announced number of bytes.
    ///
    /// For uploads `actual` is zero when the ready prompt never arrived.
    #[error("transfer length mismatch: expected {expected} bytes, got {actual}")]
    TransferLengthMismatch {
        /// Number of bytes announced or requested.
        expected: usize,
        /// Number of bytes actually declared or moved.
        actual: usize,
    },

    /// A declared length does not fit the storage offered by the caller.
    #[error("out of storage: capacity {capacity} bytes, declared {declared}")]
    OutOfStorage {
        /// Capacity of the destination.
        capacity: usize,
        /// Length declared on the wire.
        declared: usize,
    },

    /// Failed to parse a value out of the response stream.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The URC registry has no free handler slot.
    #[error("handler registry full: max {capacity} handlers")]
    RegistryFull {
        /// Number of slots the registry was sized with.
        capacity: usize,
    },

    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AtError {
    /// Whether the error came from a deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AtError::TimedOut)
    }
}

/// Result type alias for AT operations.
pub type AtResult<T> = Result<T, AtError>;

/// Map a command-specific result code to a result, where zero means success.
pub fn check_code(code: i64) -> AtResult<()> {
    match code {
        0 => Ok(()),
        code => {
            let code = i32::try_from(code)
                .map_err(|_| AtError::Parse(format!("error code {} out of range", code)))?;
            Err(AtError::DeviceCode(code))
        }
    }
}
