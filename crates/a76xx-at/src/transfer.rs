//! Length-prefixed raw transfers embedded in the text protocol.
//!
//! Uploads announce a byte count, wait for the modem to switch into data mode
//! (a prompt such as `>`), write the raw bytes and then wait for the usual
//! confirmation. Downloads wait for a `<TAG>: <count>` header, read exactly
//! the declared number of bytes and consume the trailer.
//!
//! While raw bytes are moving the matcher is never invoked, so payload bytes
//! cannot be mistaken for terminators or URCs.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{check_code, AtError, AtResult};
use crate::modem::{MatchOutcome, ModemSerial};
use crate::stream::Stream;
use crate::transport::Transport;

/// Default time allowed for a prompt or download header to appear.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(9000);

/// Upload-ready prompt used by most commands.
pub const PROMPT: &str = ">";

/// How an upload's acceptance is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm<'a> {
    /// A plain `OK` / `ERROR` terminator.
    Terminator,
    /// A `<pattern><index>,<code>` line, where a zero code means success.
    ResultCode(&'a str),
}

/// What follows the raw bytes of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trailer<'a> {
    /// A plain `OK` / `ERROR` terminator.
    Terminator,
    /// A command-specific closing line.
    Pattern(&'a str),
    /// Nothing; the raw bytes end the response.
    None,
}

/// Description of an upload.
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    command: String,
    data: &'a [u8],
    prompt: &'a str,
    inline_error: Option<&'a str>,
    prompt_timeout: Duration,
    confirm: Confirm<'a>,
    confirm_timeout: Option<Duration>,
}

impl<'a> Upload<'a> {
    /// Upload `data` after sending `command`, which must announce `data.len()`.
    pub fn new(command: impl Into<String>, data: &'a [u8]) -> Self {
        Upload {
            command: command.into(),
            data,
            prompt: PROMPT,
            inline_error: None,
            prompt_timeout: DEFAULT_TRANSFER_TIMEOUT,
            confirm: Confirm::Terminator,
            confirm_timeout: None,
        }
    }

    pub fn prompt(mut self, prompt: &'a str) -> Self {
        self.prompt = prompt;
        self
    }

    /// Alternate result the modem may send instead of the prompt, in the form
    /// `<pattern><index>,<code>`.
    pub fn inline_error(mut self, pattern: &'a str) -> Self {
        self.inline_error = Some(pattern);
        self
    }

    pub fn prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    pub fn confirm(mut self, confirm: Confirm<'a>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Defaults to the engine's default timeout.
    pub fn confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = Some(timeout);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }
}

/// Description of a download.
#[derive(Debug, Clone)]
pub struct Download<'a> {
    command: String,
    header: &'a str,
    expected: Option<usize>,
    header_timeout: Duration,
    trailer: Trailer<'a>,
    trailer_timeout: Option<Duration>,
}

impl<'a> Download<'a> {
    /// Send `command`, then expect `header` followed by the declared length.
    pub fn new(command: impl Into<String>, header: &'a str) -> Self {
        Download {
            command: command.into(),
            header,
            expected: None,
            header_timeout: DEFAULT_TRANSFER_TIMEOUT,
            trailer: Trailer::Terminator,
            trailer_timeout: None,
        }
    }

    /// Number of bytes requested. A different declared length is an error.
    pub fn expect(mut self, len: usize) -> Self {
        self.expected = Some(len);
        self
    }

    pub fn header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    pub fn trailer(mut self, trailer: Trailer<'a>) -> Self {
        self.trailer = trailer;
        self
    }

    /// Defaults to the engine's default timeout.
    pub fn trailer_timeout(mut self, timeout: Duration) -> Self {
        self.trailer_timeout = Some(timeout);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// How long the header may take to appear.
    pub fn header_wait(&self) -> Duration {
        self.header_timeout
    }
}

/// Read `, <code>` up to the end of the line.
pub(crate) fn read_indexed_code(stream: &mut Stream<'_>) -> AtResult<i64> {
    stream.find(b',')?;
    let code = stream.parse_int()?;
    stream.find(b'\n')?;
    Ok(code)
}

impl<T: Transport> ModemSerial<T> {
    /// Run an upload handshake.
    ///
    /// A missing prompt (timeout, or `OK` arriving first) is reported as a
    /// [`AtError::TransferLengthMismatch`] with nothing transferred.
    pub fn upload(&mut self, upload: &Upload<'_>) -> AtResult<()> {
        let expected = upload.data.len();
        self.send(&upload.command)?;

        let mut candidates = vec![upload.prompt];
        candidates.extend(upload.inline_error);
        match self.wait(&candidates, upload.prompt_timeout, true, true) {
            MatchOutcome::MatchedPattern(1) => {}
            MatchOutcome::MatchedPattern(_) => {
                let code = read_indexed_code(&mut self.stream())?;
                // The result line is followed by its own terminator.
                let timeout = self.config().default_timeout();
                self.wait(&[], timeout, true, true);
                check_code(code)?;
                warn!("{} answered without a prompt", upload.command);
                return Err(AtError::TransferLengthMismatch {
                    expected,
                    actual: 0,
                });
            }
            MatchOutcome::Failure => return Err(AtError::DeviceReportedFailure),
            outcome @ (MatchOutcome::Success | MatchOutcome::TimedOut) => {
                warn!("No prompt for {}: {:?}", upload.command, outcome);
                return Err(AtError::TransferLengthMismatch {
                    expected,
                    actual: 0,
                });
            }
        }

        debug!("Uploading {} bytes", expected);
        self.print(upload.data)?;

        let timeout = upload
            .confirm_timeout
            .unwrap_or_else(|| self.config().default_timeout());
        match upload.confirm {
            Confirm::Terminator => self.wait(&[], timeout, true, true).expect_success(),
            Confirm::ResultCode(pattern) => match self.wait(&[pattern], timeout, false, true) {
                MatchOutcome::MatchedPattern(_) => {
                    let code = read_indexed_code(&mut self.stream())?;
                    check_code(code)
                }
                other => other.expect_success(),
            },
        }
    }

    /// Run a download, allocating for the declared length.
    pub fn download(&mut self, download: &Download<'_>) -> AtResult<Vec<u8>> {
        let declared = self.begin_download(download)?;
        let capacity = self.config().max_download_len;
        if declared > capacity {
            return self.reject_download(download, declared, capacity);
        }
        let data = self.stream().read_exact(declared);
        let data = self.end_download(download, declared, data)?;
        Ok(data)
    }

    /// Run a download into caller storage, returning the number of bytes
    /// written.
    pub fn download_into(&mut self, download: &Download<'_>, buf: &mut [u8]) -> AtResult<usize> {
        let declared = self.begin_download(download)?;
        if declared > buf.len() {
            return self.reject_download(download, declared, buf.len());
        }
        let read = self.stream().read_into(&mut buf[..declared]);
        self.end_download(download, declared, read)?;
        Ok(declared)
    }

    /// Send the command and parse the header, leaving the stream at the first
    /// raw byte.
    fn begin_download(&mut self, download: &Download<'_>) -> AtResult<usize> {
        self.send(&download.command)?;
        match self.wait(&[download.header], download.header_timeout, false, true) {
            MatchOutcome::MatchedPattern(_) => {}
            MatchOutcome::Failure => return Err(AtError::DeviceReportedFailure),
            MatchOutcome::Success | MatchOutcome::TimedOut => return Err(AtError::TimedOut),
        }
        let mut stream = self.stream();
        let declared = stream.parse_len()?;
        stream.find(b'\n')?;
        debug!("Downloading {} bytes", declared);
        Ok(declared)
    }

    /// Discard a payload that does not fit and resynchronise.
    fn reject_download<R>(
        &mut self,
        download: &Download<'_>,
        declared: usize,
        capacity: usize,
    ) -> AtResult<R> {
        warn!(
            "Declared length {} exceeds capacity {}, discarding",
            declared, capacity
        );
        self.stream().skip(declared)?;
        // The payload is already lost; the trailer only matters for resync.
        let _ = self.finish_trailer(download);
        Err(AtError::OutOfStorage { capacity, declared })
    }

    /// Consume the trailer and check the declared length against the request.
    fn end_download<R>(
        &mut self,
        download: &Download<'_>,
        declared: usize,
        read: AtResult<R>,
    ) -> AtResult<R> {
        let value = read?;
        self.finish_trailer(download)?;
        match download.expected {
            Some(expected) if expected != declared => {
                warn!(
                    "{} declared {} bytes, expected {}",
                    download.command, declared, expected
                );
                Err(AtError::TransferLengthMismatch {
                    expected,
                    actual: declared,
                })
            }
            _ => Ok(value),
        }
    }

    fn finish_trailer(&mut self, download: &Download<'_>) -> AtResult<()> {
        let timeout = download
            .trailer_timeout
            .unwrap_or_else(|| self.config().default_timeout());
        match download.trailer {
            Trailer::Terminator => self.wait(&[], timeout, true, true).expect_success(),
            Trailer::Pattern(pattern) => {
                self.wait(&[pattern], timeout, false, true).expect_success()
            }
            Trailer::None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::mock::MockTransport;

    fn engine() -> (ModemSerial<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let config = EngineConfig {
            poll_interval_ms: 0,
            byte_timeout_ms: 20,
            default_timeout_ms: 100,
            ..EngineConfig::default()
        };
        (ModemSerial::with_config(mock.clone(), config), mock)
    }

    #[test]
    fn test_upload_writes_raw_after_prompt() {
        let (mut modem, mock) = engine();
        // Bytes after the prompt stay buffered until the confirmation wait.
        mock.set_responder(|line| {
            if line.starts_with("AT+CCERTDOWN") {
                b"\r\n>\r\nOK\r\n".to_vec()
            } else {
                Vec::new()
            }
        });
        let upload = Upload::new("AT+CCERTDOWN=\"ca.pem\",5", b"CERT!");
        modem.upload(&upload).unwrap();
        assert_eq!(mock.written_string(), "AT+CCERTDOWN=\"ca.pem\",5\r\nCERT!");
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_upload_without_prompt() {
        let (mut modem, mock) = engine();
        mock.set_responder(|_| b"\r\nOK\r\n".to_vec());
        let err = modem.upload(&Upload::new("AT+X=3", b"abc")).unwrap_err();
        assert!(matches!(
            err,
            AtError::TransferLengthMismatch { expected: 3, actual: 0 }
        ));
        assert_eq!(mock.written_string(), "AT+X=3\r\n");
    }

    #[test]
    fn test_upload_inline_error_code() {
        let (mut modem, mock) = engine();
        mock.set_responder(|_| b"\r\n+CMQTTTOPIC: 0,11\r\n".to_vec());
        let upload = Upload::new("AT+CMQTTTOPIC=0,3", b"a/b").inline_error("+CMQTTTOPIC: ");
        let err = modem.upload(&upload).unwrap_err();
        assert!(matches!(err, AtError::DeviceCode(11)));
    }

    #[test]
    fn test_upload_inline_error_consumes_terminator() {
        let (mut modem, mock) = engine();
        mock.set_responder(|line| {
            if line.starts_with("AT+CMQTTTOPIC") {
                b"\r\n+CMQTTTOPIC: 0,11\r\nERROR\r\n".to_vec()
            } else {
                b"\r\nOK\r\n".to_vec()
            }
        });
        let upload = Upload::new("AT+CMQTTTOPIC=0,3", b"a/b").inline_error("+CMQTTTOPIC: ");
        assert!(matches!(modem.upload(&upload), Err(AtError::DeviceCode(11))));
        assert_eq!(mock.pending(), 0);
        modem.send("AT").unwrap();
        modem
            .wait(&[], Duration::from_millis(100), true, true)
            .expect_success()
            .unwrap();
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_upload_result_code_confirmation() {
        let (mut modem, mock) = engine();
        mock.set_responder(|_| b"\r\n>\r\nOK\r\n\r\n+CMQTTSUB: 0,0\r\n".to_vec());
        let upload = Upload::new("AT+CMQTTSUB=0,3,1", b"a/b")
            .confirm(Confirm::ResultCode("+CMQTTSUB: "));
        modem.upload(&upload).unwrap();
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_download_reads_declared_bytes() {
        let (mut modem, mock) = engine();
        mock.set_responder(|_| b"\r\n+HTTPHEAD: 5\r\nhello\r\nOK\r\n".to_vec());
        let data = modem
            .download(&Download::new("AT+HTTPHEAD", "+HTTPHEAD: "))
            .unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_download_length_mismatch_resyncs() {
        let (mut modem, mock) = engine();
        mock.set_responder(|_| {
            b"OK\r\n\r\n+HTTPREAD: 3\r\nabc\r\n+HTTPREAD: 0\r\n".to_vec()
        });
        let download = Download::new("AT+HTTPREAD=0,10", "+HTTPREAD: ")
            .expect(10)
            .trailer(Trailer::Pattern("+HTTPREAD: 0"));
        let err = modem.download(&download).unwrap_err();
        assert!(matches!(
            err,
            AtError::TransferLengthMismatch { expected: 10, actual: 3 }
        ));
        assert_eq!(mock.pending(), 2);
    }

    #[test]
    fn test_download_into_small_buffer() {
        let (mut modem, mock) = engine();
        mock.set_responder(|_| b"\r\n+HTTPHEAD: 8\r\n12345678\r\nOK\r\n".to_vec());
        let mut buf = [0u8; 4];
        let err = modem
            .download_into(&Download::new("AT+HTTPHEAD", "+HTTPHEAD: "), &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            AtError::OutOfStorage { capacity: 4, declared: 8 }
        ));
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_download_short_payload() {
        let (mut modem, mock) = engine();
        mock.set_responder(|_| b"\r\n+HTTPHEAD: 9\r\nabc".to_vec());
        let err = modem
            .download(&Download::new("AT+HTTPHEAD", "+HTTPHEAD: "))
            .unwrap_err();
        assert!(matches!(
            err,
            AtError::TransferLengthMismatch { expected: 9, actual: 3 }
        ));
    }
}
