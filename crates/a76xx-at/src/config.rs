//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::window::DEFAULT_WINDOW_CAPACITY;

/// Tunables for a [`ModemSerial`](crate::ModemSerial) instance.
///
/// All durations are expressed in milliseconds so the struct reads naturally
/// from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the rolling match window in bytes.
    pub window_capacity: usize,
    /// Number of URC handler slots.
    pub max_handlers: usize,
    /// Capacity of the dispatched URC event queue.
    pub urc_queue_capacity: usize,
    /// Sleep between polls of an idle transport. Zero yields instead.
    pub poll_interval_ms: u64,
    /// Timeout for plain terminator waits.
    pub default_timeout_ms: u64,
    /// Timeout for each byte of a raw read or a parse helper.
    pub byte_timeout_ms: u64,
    /// Largest declared length a download will allocate for.
    pub max_download_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            max_handlers: 16,
            urc_queue_capacity: 8,
            poll_interval_ms: 1,
            default_timeout_ms: 1000,
            byte_timeout_ms: 1000,
            max_download_len: 64 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: EngineConfig = serde_yaml::from_str("byte_timeout_ms: 250\n").unwrap();
        assert_eq!(config.byte_timeout(), Duration::from_millis(250));
        assert_eq!(config.window_capacity, DEFAULT_WINDOW_CAPACITY);
        assert_eq!(config.max_handlers, 16);
    }
}
