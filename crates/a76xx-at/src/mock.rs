//! In-memory transport for tests and offline tooling.
//!
//! A [`MockTransport`] is a cloneable handle: the engine owns one clone while
//! the test keeps another to feed modem output and inspect what was written.
//! An optional responder is called for every complete `\r\n`-terminated line
//! the engine writes, which is enough to script simple request/response
//! exchanges.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::transport::Transport;

type Responder = Box<dyn FnMut(&str) -> Vec<u8> + Send>;

#[derive(Default)]
struct MockState {
    /// Bytes the modem has "sent", waiting to be read.
    input: VecDeque<u8>,
    /// Everything the engine wrote.
    written: Vec<u8>,
    /// Start of the current partial line in `written`.
    line_start: usize,
    responder: Option<Responder>,
    /// Fail the next write with `BrokenPipe`.
    fail_writes: bool,
}

/// Scriptable in-memory [`Transport`].
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("pending", &state.input.len())
            .field("written", &state.written.len())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport with `input` already queued for reading.
    pub fn with_input(input: &[u8]) -> Self {
        let mock = Self::new();
        mock.feed(input);
        mock
    }

    /// Queue bytes for the engine to read.
    pub fn feed(&self, data: &[u8]) {
        self.state.lock().input.extend(data.iter().copied());
    }

    /// Take everything written so far.
    pub fn take_written(&self) -> Vec<u8> {
        let mut state = self.state.lock();
        state.line_start = 0;
        std::mem::take(&mut state.written)
    }

    /// Everything written so far, as text. Does not consume.
    pub fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().written).to_string()
    }

    /// Number of bytes still waiting to be read.
    pub fn pending(&self) -> usize {
        self.state.lock().input.len()
    }

    /// Make subsequent writes fail, or succeed again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Install a callback producing modem output for each written line.
    ///
    /// The line is passed without its `\r\n`. Raw payload bytes that never end
    /// a line do not reach the responder.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<u8> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    /// Remove the responder.
    pub fn clear_responder(&self) {
        self.state.lock().responder = None;
    }
}

impl MockState {
    fn dispatch_lines(&mut self) {
        while let Some(pos) = self.written[self.line_start..]
            .windows(2)
            .position(|w| w == b"\r\n")
        {
            let end = self.line_start + pos;
            let line = String::from_utf8_lossy(&self.written[self.line_start..end]).to_string();
            self.line_start = end + 2;
            if let Some(responder) = self.responder.as_mut() {
                let reply = responder(&line);
                self.input.extend(reply);
            }
        }
    }
}

impl Transport for MockTransport {
    fn available(&mut self) -> usize {
        self.state.lock().input.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.state.lock().input.pop_front()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        state.written.extend_from_slice(data);
        state.dispatch_lines();
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
