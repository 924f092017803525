//! The rolling matcher.
//!
//! [`ModemSerial`] owns the transport and is the only place bytes are read
//! while waiting for a response. For every byte it consumes it:
//!
//! 1. appends the byte to the rolling window,
//! 2. dispatches any URC handler whose pattern the window now ends with,
//! 3. tests the caller's patterns in order, then `ERROR`, then `OK`.
//!
//! The window belongs to the engine, not to a single wait. A wait that times
//! out leaves it untouched, so a terminator that arrives marginally late is
//! still recognised by the next wait.

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::config::EngineConfig;
use crate::error::{AtError, AtResult};
use crate::queue::{BoundedQueue, OverflowPolicy};
use crate::stream::Stream;
use crate::transport::Transport;
use crate::urc::{HandlerId, UrcEvent, UrcHandler, UrcRegistry};
use crate::window::RollingWindow;

/// Generic success terminator.
pub const RESPONSE_OK: &str = "OK\r\n";

/// Generic failure terminator.
pub const RESPONSE_ERROR: &str = "ERROR\r\n";

/// Maximum number of caller patterns per wait.
pub const MAX_PATTERNS: usize = 3;

/// Result of a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The caller pattern at this 1-based position matched.
    MatchedPattern(u8),
    /// `OK\r\n` matched.
    Success,
    /// `ERROR\r\n` matched.
    Failure,
    /// Nothing matched before the deadline.
    TimedOut,
}

impl MatchOutcome {
    /// Whether the caller pattern at 1-based position `index` matched.
    pub fn is_pattern(self, index: u8) -> bool {
        self == MatchOutcome::MatchedPattern(index)
    }

    /// Turn a plain terminator wait into a result.
    ///
    /// A matched caller pattern counts as success.
    pub fn expect_success(self) -> AtResult<()> {
        match self {
            MatchOutcome::Success | MatchOutcome::MatchedPattern(_) => Ok(()),
            MatchOutcome::Failure => Err(AtError::DeviceReportedFailure),
            MatchOutcome::TimedOut => Err(AtError::TimedOut),
        }
    }
}

/// AT command engine bound to one transport.
pub struct ModemSerial<T: Transport> {
    transport: T,
    /// One byte of pushback for the parse helpers.
    lookahead: Option<u8>,
    window: RollingWindow,
    registry: UrcRegistry,
    /// Events produced by dispatched handlers, oldest evicted first.
    urc_events: BoundedQueue<UrcEvent>,
    config: EngineConfig,
}

impl<T: Transport> std::fmt::Debug for ModemSerial<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemSerial")
            .field("window", &self.window.as_str_lossy())
            .field("registry", &self.registry)
            .field("urc_pending", &self.urc_events.len())
            .finish()
    }
}

impl<T: Transport> ModemSerial<T> {
    /// Create an engine with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, EngineConfig::default())
    }

    pub fn with_config(transport: T, config: EngineConfig) -> Self {
        ModemSerial {
            transport,
            lookahead: None,
            window: RollingWindow::new(config.window_capacity),
            registry: UrcRegistry::new(config.max_handlers),
            urc_events: BoundedQueue::new(config.urc_queue_capacity, OverflowPolicy::DropOldest),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport. Registered handlers are dropped.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Borrow the byte stream for direct parsing.
    pub fn stream(&mut self) -> Stream<'_> {
        Stream::new(
            &mut self.transport,
            &mut self.lookahead,
            self.config.poll_interval(),
            self.config.byte_timeout(),
        )
    }

    /// Write a command line followed by `\r\n` and flush.
    pub fn send(&mut self, command: &str) -> AtResult<()> {
        trace!("-> {}", command);
        self.transport.write(command.as_bytes())?;
        self.transport.write(b"\r\n")?;
        self.transport.flush()?;
        Ok(())
    }

    /// Write raw bytes without a terminator and flush.
    pub fn print(&mut self, data: &[u8]) -> AtResult<()> {
        trace!("-> {} raw bytes", data.len());
        self.transport.write(data)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Consume the stream until a candidate matches or `timeout` expires.
    ///
    /// Up to [`MAX_PATTERNS`] caller patterns are tested, in order, before
    /// `ERROR\r\n` (when `match_failure`) and `OK\r\n` (when `match_success`).
    /// Buffered bytes are always consumed, so a zero timeout still polls.
    pub fn wait(
        &mut self,
        patterns: &[&str],
        timeout: Duration,
        match_success: bool,
        match_failure: bool,
    ) -> MatchOutcome {
        let patterns = if patterns.len() > MAX_PATTERNS {
            warn!(
                "wait called with {} patterns, ignoring all but the first {}",
                patterns.len(),
                MAX_PATTERNS
            );
            &patterns[..MAX_PATTERNS]
        } else {
            patterns
        };

        let ModemSerial {
            transport,
            lookahead,
            window,
            registry,
            urc_events,
            config,
        } = self;
        let mut stream = Stream::new(
            transport,
            lookahead,
            config.poll_interval(),
            config.byte_timeout(),
        );
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let Some(byte) = stream.try_read() else {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return MatchOutcome::TimedOut;
                }
                stream.idle();
                continue;
            };

            window.push(byte);
            if !registry.is_empty() {
                registry.dispatch(window, &mut stream, urc_events);
            }

            if let Some(outcome) = classify(window, patterns, match_success, match_failure) {
                trace!("<- {:?}", outcome);
                return outcome;
            }
        }
    }

    /// Add a URC handler, tested on every byte of every subsequent wait.
    pub fn register(&mut self, handler: Box<dyn UrcHandler>) -> AtResult<HandlerId> {
        self.registry.register(handler)
    }

    /// Remove a previously registered handler.
    pub fn deregister(&mut self, id: HandlerId) -> Option<Box<dyn UrcHandler>> {
        self.registry.deregister(id)
    }

    pub fn registry(&self) -> &UrcRegistry {
        &self.registry
    }

    /// Take the oldest dispatched URC event.
    pub fn pop_urc(&mut self) -> Option<UrcEvent> {
        self.urc_events.pop()
    }

    /// Number of URC events waiting to be popped.
    pub fn urc_pending(&self) -> usize {
        self.urc_events.len()
    }

    /// Current contents of the rolling window.
    pub fn window(&self) -> &RollingWindow {
        &self.window
    }
}

/// Test the window against the candidates in precedence order.
fn classify(
    window: &RollingWindow,
    patterns: &[&str],
    match_success: bool,
    match_failure: bool,
) -> Option<MatchOutcome> {
    for (index, pattern) in patterns.iter().enumerate() {
        if window.ends_with(pattern.as_bytes()) {
            return Some(MatchOutcome::MatchedPattern(index as u8 + 1));
        }
    }
    if match_failure && window.ends_with(RESPONSE_ERROR.as_bytes()) {
        return Some(MatchOutcome::Failure);
    }
    if match_success && window.ends_with(RESPONSE_OK.as_bytes()) {
        return Some(MatchOutcome::Success);
    }
    None
}
