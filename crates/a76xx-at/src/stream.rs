//! Direct access to the byte stream for parsers and URC handlers.
//!
//! A [`Stream`] borrows the transport out of a live [`ModemSerial`](crate::ModemSerial)
//! and reads bytes without appending them to the rolling window. It is the
//! capability handed to URC handlers while a wait is in progress, and the tool
//! command wrappers use to pick values out of a response after a pattern match.
//!
//! All reads are byte-at-a-time with a timeout, since the transport does not
//! guarantee bulk delivery.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{AtError, AtResult};
use crate::transport::Transport;
use crate::window::RollingWindow;

/// Borrowed view of the modem byte stream.
pub struct Stream<'a> {
    transport: &'a mut dyn Transport,
    /// Single byte of pushback shared with the owning engine.
    lookahead: &'a mut Option<u8>,
    poll_interval: Duration,
    byte_timeout: Duration,
}

impl<'a> Stream<'a> {
    pub(crate) fn new(
        transport: &'a mut dyn Transport,
        lookahead: &'a mut Option<u8>,
        poll_interval: Duration,
        byte_timeout: Duration,
    ) -> Self {
        Stream {
            transport,
            lookahead,
            poll_interval,
            byte_timeout,
        }
    }

    /// Per-byte timeout used by the blocking helpers.
    pub fn byte_timeout(&self) -> Duration {
        self.byte_timeout
    }

    /// Whether a byte can be read without waiting.
    pub fn has_data(&mut self) -> bool {
        self.lookahead.is_some() || self.transport.available() > 0
    }

    /// Read a byte if one is ready.
    pub fn try_read(&mut self) -> Option<u8> {
        if let Some(byte) = self.lookahead.take() {
            return Some(byte);
        }
        if self.transport.available() > 0 {
            self.transport.read_byte()
        } else {
            None
        }
    }

    /// Push a byte back so the next read returns it.
    ///
    /// Only one byte of pushback exists; the previous one is replaced.
    pub fn unread(&mut self, byte: u8) {
        *self.lookahead = Some(byte);
    }

    /// Read a byte, waiting up to `timeout` for one to arrive.
    pub fn read_byte_timeout(&mut self, timeout: Duration) -> Option<u8> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(byte) = self.try_read() {
                return Some(byte);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            self.idle();
        }
    }

    /// Read a byte using the per-byte timeout.
    pub fn read_byte(&mut self) -> AtResult<u8> {
        self.read_byte_timeout(self.byte_timeout)
            .ok_or(AtError::TimedOut)
    }

    /// Consume bytes up to and including the first occurrence of `target`.
    pub fn find(&mut self, target: u8) -> AtResult<()> {
        loop {
            if self.read_byte()? == target {
                return Ok(());
            }
        }
    }

    /// Parse a decimal integer.
    ///
    /// Leading bytes that cannot start a number are skipped. The first byte
    /// after the digits is left unread, so a following `find(b',')` still sees
    /// the separator.
    pub fn parse_int(&mut self) -> AtResult<i64> {
        let mut negative = false;
        let first = loop {
            match self.read_byte()? {
                b'-' => {
                    negative = true;
                    match self.read_byte()? {
                        digit @ b'0'..=b'9' => break digit,
                        other => {
                            negative = false;
                            self.unread(other);
                        }
                    }
                }
                digit @ b'0'..=b'9' => break digit,
                _ => {}
            }
        };

        let mut value = i64::from(first - b'0');
        while let Some(byte) = self.read_byte_timeout(self.byte_timeout) {
            match byte {
                b'0'..=b'9' => {
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(i64::from(byte - b'0')))
                        .ok_or_else(|| AtError::Parse("integer overflow".to_string()))?;
                }
                other => {
                    self.unread(other);
                    break;
                }
            }
        }
        Ok(if negative { -value } else { value })
    }

    /// Parse a non-negative integer as a length.
    pub fn parse_len(&mut self) -> AtResult<usize> {
        let value = self.parse_int()?;
        usize::try_from(value).map_err(|_| AtError::Parse(format!("invalid length {}", value)))
    }

    /// Discard exactly `count` bytes.
    pub fn skip(&mut self, count: usize) -> AtResult<()> {
        for done in 0..count {
            if self.read_byte_timeout(self.byte_timeout).is_none() {
                return Err(AtError::TransferLengthMismatch {
                    expected: count,
                    actual: done,
                });
            }
        }
        Ok(())
    }

    /// Fill `buf` completely with raw bytes.
    pub fn read_into(&mut self, buf: &mut [u8]) -> AtResult<()> {
        let expected = buf.len();
        for (done, slot) in buf.iter_mut().enumerate() {
            *slot = self
                .read_byte_timeout(self.byte_timeout)
                .ok_or(AtError::TransferLengthMismatch {
                    expected,
                    actual: done,
                })?;
        }
        Ok(())
    }

    /// Read exactly `count` raw bytes.
    pub fn read_exact(&mut self, count: usize) -> AtResult<Vec<u8>> {
        let mut data = vec![0u8; count];
        self.read_into(&mut data)?;
        Ok(data)
    }

    /// Read a line terminated by `\r`, consuming the `\n` that follows.
    ///
    /// At most `max_len` bytes are kept; the rest of an overlong line is
    /// consumed and discarded.
    pub fn read_line(&mut self, max_len: usize) -> AtResult<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte()? {
                b'\r' => {
                    match self.read_byte_timeout(self.byte_timeout) {
                        Some(b'\n') | None => {}
                        Some(other) => self.unread(other),
                    }
                    break;
                }
                byte if line.len() < max_len => line.push(byte),
                _ => {}
            }
        }
        Ok(String::from_utf8_lossy(&line).to_string())
    }

    /// Consume bytes until the stream ends with `pattern`.
    ///
    /// This is a plain suffix wait with its own window: no URC dispatch and no
    /// generic terminators. Handlers use it to skip to the next block of a
    /// multi-line notification.
    pub fn wait_for(&mut self, pattern: &str, timeout: Duration) -> AtResult<()> {
        let pattern = pattern.as_bytes();
        let mut window = RollingWindow::new(pattern.len());
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.try_read() {
                Some(byte) => {
                    window.push(byte);
                    if window.ends_with(pattern) {
                        return Ok(());
                    }
                }
                None => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(AtError::TimedOut);
                    }
                    self.idle();
                }
            }
        }
    }

    /// Give up the CPU between polls of an idle transport.
    pub(crate) fn idle(&self) {
        if self.poll_interval.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn with_stream<R>(input: &[u8], f: impl FnOnce(&mut Stream<'_>) -> R) -> R {
        let mut transport = MockTransport::with_input(input);
        let mut lookahead = None;
        let mut stream = Stream::new(
            &mut transport,
            &mut lookahead,
            Duration::ZERO,
            Duration::from_millis(20),
        );
        f(&mut stream)
    }

    #[test]
    fn test_parse_int_leaves_separator() {
        with_stream(b" 0,17,-3\r\n", |stream| {
            assert_eq!(stream.parse_int().unwrap(), 0);
            stream.find(b',').unwrap();
            assert_eq!(stream.parse_int().unwrap(), 17);
            stream.find(b',').unwrap();
            assert_eq!(stream.parse_int().unwrap(), -3);
            assert_eq!(stream.read_byte().unwrap(), b'\r');
        });
    }

    #[test]
    fn test_parse_int_at_end_of_stream() {
        with_stream(b"42", |stream| {
            assert_eq!(stream.parse_int().unwrap(), 42);
        });
        with_stream(b"abc", |stream| {
            assert!(matches!(stream.parse_int(), Err(AtError::TimedOut)));
        });
    }

    #[test]
    fn test_parse_int_lone_minus() {
        with_stream(b"- 5", |stream| {
            assert_eq!(stream.parse_int().unwrap(), 5);
        });
    }

    #[test]
    fn test_read_exact_short() {
        with_stream(b"abc", |stream| {
            let err = stream.read_exact(5).unwrap_err();
            assert!(matches!(
                err,
                AtError::TransferLengthMismatch { expected: 5, actual: 3 }
            ));
        });
    }

    #[test]
    fn test_read_line() {
        with_stream(b"$GPGGA,1,2\r\nnext", |stream| {
            assert_eq!(stream.read_line(80).unwrap(), "$GPGGA,1,2");
            assert_eq!(stream.read_byte().unwrap(), b'n');
        });
    }

    #[test]
    fn test_wait_for() {
        with_stream(b"junk\r\n+CMQTTRXTOPIC: 0,3\r\n", |stream| {
            stream.wait_for("+CMQTTRXTOPIC: ", Duration::from_millis(20)).unwrap();
            assert_eq!(stream.parse_int().unwrap(), 0);
        });
        with_stream(b"nothing here", |stream| {
            assert!(stream.wait_for("+X", Duration::ZERO).is_err());
        });
    }
}
