//! Rolling window over the most recent bytes read from the modem.
//!
//! Matching in the AT dialect is defined as "the stream so far ends with this
//! pattern", checked after every single byte. The window keeps just enough
//! history for the longest pattern in use and drops the oldest byte when full.

use bytes::{Buf, BytesMut};

/// Default window capacity in bytes.
pub const DEFAULT_WINDOW_CAPACITY: usize = 64;

/// A bounded buffer holding the trailing bytes of the response stream.
#[derive(Debug)]
pub struct RollingWindow {
    /// Most recent bytes, oldest first.
    buffer: BytesMut,
    /// Maximum number of bytes retained.
    capacity: usize,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl RollingWindow {
    /// Create a window retaining at most `capacity` bytes (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RollingWindow {
            buffer: BytesMut::with_capacity(capacity * 2),
            capacity,
        }
    }

    /// Append a byte, dropping the oldest one if the window is full.
    pub fn push(&mut self, byte: u8) {
        if self.buffer.len() == self.capacity {
            self.buffer.advance(1);
        }
        self.buffer.extend_from_slice(&[byte]);
    }

    /// Check whether the window's suffix equals `pattern`.
    ///
    /// An empty pattern never matches, and neither does one longer than the
    /// window capacity.
    pub fn ends_with(&self, pattern: &[u8]) -> bool {
        !pattern.is_empty() && self.buffer.ends_with(pattern)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no byte has been pushed since creation or the last clear.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of bytes retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear the window.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Get the current window contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the current window contents as a string (for debugging).
    pub fn as_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}
