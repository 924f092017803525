//! The seam between the engine and the command layers built on it.
//!
//! Command wrappers and client façades talk to an `&mut dyn AtChannel`
//! rather than to a concrete [`ModemSerial`], so they can be driven by any
//! engine instance regardless of its transport type.

use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{check_code, AtResult};
use crate::modem::{MatchOutcome, ModemSerial};
use crate::stream::Stream;
use crate::transfer::{read_indexed_code, Download, Upload};
use crate::transport::Transport;
use crate::urc::{HandlerId, UrcEvent, UrcHandler};

/// Operations the command layers need from the engine.
pub trait AtChannel {
    fn config(&self) -> &EngineConfig;

    /// Write a command line followed by `\r\n`.
    fn send(&mut self, command: &str) -> AtResult<()>;

    /// Write raw bytes without a terminator.
    fn print(&mut self, data: &[u8]) -> AtResult<()>;

    /// See [`ModemSerial::wait`].
    fn wait(
        &mut self,
        patterns: &[&str],
        timeout: Duration,
        match_success: bool,
        match_failure: bool,
    ) -> MatchOutcome;

    /// Borrow the byte stream for direct parsing.
    fn stream(&mut self) -> Stream<'_>;

    fn upload(&mut self, upload: &Upload<'_>) -> AtResult<()>;

    fn download(&mut self, download: &Download<'_>) -> AtResult<Vec<u8>>;

    fn download_into(&mut self, download: &Download<'_>, buf: &mut [u8]) -> AtResult<usize>;

    fn register(&mut self, handler: Box<dyn UrcHandler>) -> AtResult<HandlerId>;

    fn deregister(&mut self, id: HandlerId) -> Option<Box<dyn UrcHandler>>;

    /// Take the oldest dispatched URC event.
    fn pop_urc(&mut self) -> Option<UrcEvent>;

    /// Wait for the generic terminators only.
    fn wait_ok(&mut self, timeout: Duration) -> AtResult<()> {
        self.wait(&[], timeout, true, true).expect_success()
    }

    /// Send a command and wait for `OK`.
    fn command(&mut self, command: &str, timeout: Duration) -> AtResult<()> {
        self.send(command)?;
        self.wait_ok(timeout)
    }

    /// Let URCs be dispatched for `timeout` without matching anything else.
    fn listen(&mut self, timeout: Duration) {
        self.wait(&[], timeout, false, false);
    }

    /// Consume the stream up to the next terminator, discarding the outcome.
    fn clear(&mut self, timeout: Duration) {
        self.wait(&[], timeout, true, true);
    }

    fn find(&mut self, target: u8) -> AtResult<()> {
        self.stream().find(target)
    }

    fn parse_int(&mut self) -> AtResult<i64> {
        self.stream().parse_int()
    }

    /// Parse an integer, then skip to the next terminator.
    fn parse_int_clear(&mut self, timeout: Duration) -> AtResult<i64> {
        let value = self.parse_int()?;
        self.clear(timeout);
        Ok(value)
    }

    /// Parse `<code>` up to the end of the line and map it to a result.
    fn code_line(&mut self) -> AtResult<()> {
        let mut stream = self.stream();
        let code = stream.parse_int()?;
        stream.find(b'\n')?;
        check_code(code)
    }

    /// Parse `<index>,<code>` up to the end of the line and map the code to a
    /// result.
    fn indexed_code_line(&mut self) -> AtResult<()> {
        let code = read_indexed_code(&mut self.stream())?;
        check_code(code)
    }
}

impl<T: Transport> AtChannel for ModemSerial<T> {
    fn config(&self) -> &EngineConfig {
        ModemSerial::config(self)
    }

    fn send(&mut self, command: &str) -> AtResult<()> {
        ModemSerial::send(self, command)
    }

    fn print(&mut self, data: &[u8]) -> AtResult<()> {
        ModemSerial::print(self, data)
    }

    fn wait(
        &mut self,
        patterns: &[&str],
        timeout: Duration,
        match_success: bool,
        match_failure: bool,
    ) -> MatchOutcome {
        ModemSerial::wait(self, patterns, timeout, match_success, match_failure)
    }

    fn stream(&mut self) -> Stream<'_> {
        ModemSerial::stream(self)
    }

    fn upload(&mut self, upload: &Upload<'_>) -> AtResult<()> {
        ModemSerial::upload(self, upload)
    }

    fn download(&mut self, download: &Download<'_>) -> AtResult<Vec<u8>> {
        ModemSerial::download(self, download)
    }

    fn download_into(&mut self, download: &Download<'_>, buf: &mut [u8]) -> AtResult<usize> {
        ModemSerial::download_into(self, download, buf)
    }

    fn register(&mut self, handler: Box<dyn UrcHandler>) -> AtResult<HandlerId> {
        ModemSerial::register(self, handler)
    }

    fn deregister(&mut self, id: HandlerId) -> Option<Box<dyn UrcHandler>> {
        ModemSerial::deregister(self, id)
    }

    fn pop_urc(&mut self) -> Option<UrcEvent> {
        ModemSerial::pop_urc(self)
    }
}
