//! GNSS power control and the unsolicited NMEA sentence stream.

use std::time::Duration;

use a76xx_at::{
    shared_queue, AtChannel, AtError, AtResult, HandlerId, MatchOutcome, OverflowPolicy,
    SharedQueue, Stream, UrcEvent, UrcHandler,
};
use tracing::{debug, warn};

use crate::error::ClientResult;

/// Storage per sentence, including the terminator.
pub const NMEA_SENTENCE_CAPACITY: usize = 96;

/// Sentences buffered before the oldest is dropped.
pub const NMEA_INBOX_CAPACITY: usize = 8;

/// Talker prefixes the modem emits.
pub const NMEA_PREFIXES: [&str; 6] = ["$GP", "$GA", "$GB", "$GN", "$GL", "$BD"];

const GNSS_TIMEOUT: Duration = Duration::from_secs(9);

/// One NMEA sentence without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmeaSentence(String);

impl NmeaSentence {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Talker and sentence type, e.g. `GPGGA`.
    pub fn kind(&self) -> &str {
        let body = self.0.strip_prefix('$').unwrap_or(&self.0);
        body.split(',').next().unwrap_or(body)
    }
}

impl std::fmt::Display for NmeaSentence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Captures sentences starting with one talker prefix.
pub struct NmeaHandler {
    prefix: &'static str,
    inbox: SharedQueue<NmeaSentence>,
}

impl NmeaHandler {
    pub fn new(prefix: &'static str, inbox: SharedQueue<NmeaSentence>) -> Self {
        NmeaHandler { prefix, inbox }
    }
}

impl UrcHandler for NmeaHandler {
    fn pattern(&self) -> &str {
        self.prefix
    }

    fn event(&self) -> Option<UrcEvent> {
        Some(UrcEvent::GnssSentence)
    }

    fn process(&mut self, stream: &mut Stream<'_>) -> AtResult<()> {
        let room = NMEA_SENTENCE_CAPACITY.saturating_sub(1 + self.prefix.len());
        let rest = stream.read_line(room)?;
        let sentence = NmeaSentence(format!("{}{}", self.prefix, rest));
        self.inbox.lock().push(sentence);
        Ok(())
    }
}

/// Cold, warm or hot receiver start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Cold,
    Warm,
    Hot,
}

impl StartMode {
    fn command(self) -> &'static str {
        match self {
            StartMode::Cold => "AT+CGPSCOLD",
            StartMode::Warm => "AT+CGPSWARM",
            StartMode::Hot => "AT+CGPSHOT",
        }
    }
}

/// The `AT+CGNSS*` command set.
pub struct GnssCommands<'a> {
    channel: &'a mut dyn AtChannel,
}

impl<'a> GnssCommands<'a> {
    pub fn new(channel: &'a mut dyn AtChannel) -> Self {
        GnssCommands { channel }
    }

    /// Power the receiver on and wait up to `ready_timeout` for `READY!`.
    ///
    /// Returns `false` if the modem acknowledged but never reported ready.
    pub fn power_on(&mut self, ready_timeout: Duration) -> ClientResult<bool> {
        self.channel.command("AT+CGNSSPWR=1", GNSS_TIMEOUT)?;
        match self.channel.wait(&["+CGNSSPWR: READY!"], ready_timeout, false, true) {
            MatchOutcome::MatchedPattern(_) => Ok(true),
            MatchOutcome::TimedOut | MatchOutcome::Success => Ok(false),
            MatchOutcome::Failure => Err(AtError::DeviceReportedFailure.into()),
        }
    }

    pub fn power_off(&mut self) -> ClientResult<()> {
        self.channel.command("AT+CGNSSPWR=0", GNSS_TIMEOUT)?;
        Ok(())
    }

    /// Constellation selection, see `AT+CGNSSMODE`.
    pub fn set_support_mode(&mut self, mode: u8) -> ClientResult<()> {
        self.channel
            .command(&format!("AT+CGNSSMODE={}", mode), GNSS_TIMEOUT)?;
        Ok(())
    }

    pub fn set_nmea_rate(&mut self, hz: u8) -> ClientResult<()> {
        self.channel
            .command(&format!("AT+CGPSNMEARATE={}", hz), GNSS_TIMEOUT)?;
        Ok(())
    }

    pub fn start(&mut self, mode: StartMode) -> ClientResult<()> {
        self.channel.command(mode.command(), GNSS_TIMEOUT)?;
        Ok(())
    }

    /// Route NMEA output to the AT port.
    pub fn select_output_port(&mut self) -> ClientResult<()> {
        self.channel
            .command("AT+CGNSSPORTSWITCH=0,1", GNSS_TIMEOUT)?;
        Ok(())
    }

    pub fn set_nmea_output(&mut self, enable: bool) -> ClientResult<()> {
        self.channel
            .command(&format!("AT+CGNSSTST={}", u8::from(enable)), GNSS_TIMEOUT)?;
        Ok(())
    }
}

/// NMEA stream state: the shared inbox and the registered handlers.
pub struct GnssStream {
    inbox: SharedQueue<NmeaSentence>,
    handlers: Vec<HandlerId>,
}

impl Default for GnssStream {
    fn default() -> Self {
        Self::new()
    }
}

impl GnssStream {
    pub fn new() -> Self {
        GnssStream {
            inbox: shared_queue(NMEA_INBOX_CAPACITY, OverflowPolicy::DropOldest),
            handlers: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Register the handlers, then turn NMEA output on.
    pub fn enable(&mut self, channel: &mut dyn AtChannel) -> ClientResult<()> {
        if self.is_enabled() {
            return Ok(());
        }
        GnssCommands::new(channel).select_output_port()?;
        for prefix in NMEA_PREFIXES {
            match channel.register(Box::new(NmeaHandler::new(prefix, self.inbox.clone()))) {
                Ok(id) => self.handlers.push(id),
                Err(e) => {
                    self.deregister(channel);
                    return Err(e.into());
                }
            }
        }
        debug!("Registered {} NMEA handlers", self.handlers.len());
        if let Err(e) = GnssCommands::new(channel).set_nmea_output(true) {
            self.deregister(channel);
            return Err(e);
        }
        Ok(())
    }

    /// Turn NMEA output off and remove the handlers. `exhaust` also drops
    /// sentences still buffered.
    pub fn disable(&mut self, channel: &mut dyn AtChannel, exhaust: bool) -> ClientResult<()> {
        let result = GnssCommands::new(channel).set_nmea_output(false);
        if result.is_err() {
            warn!("Failed to stop NMEA output, removing handlers anyway");
        }
        self.deregister(channel);
        if exhaust {
            self.inbox.lock().clear();
        }
        result
    }

    pub fn available(&self) -> usize {
        self.inbox.lock().len()
    }

    pub fn pop(&mut self) -> Option<NmeaSentence> {
        self.inbox.lock().pop()
    }

    fn deregister(&mut self, channel: &mut dyn AtChannel) {
        for id in self.handlers.drain(..) {
            channel.deregister(id);
        }
    }
}
