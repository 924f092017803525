//! SSL context configuration, certificate provisioning and the SSL/TCP
//! socket service.
//!
//! Certificates live in named slots in the modem's flash. An SSL context
//! (`AT+CSSLCFG`) refers to slots by name and carries the authentication mode
//! that matches the slots it has been given. Socket sessions (`AT+CCH*`) are
//! bound to a context and move raw bytes with the transfer protocol.

use std::time::Duration;

use a76xx_at::{check_code, AtChannel, AtError, MatchOutcome, Upload, DEFAULT_TRANSFER_TIMEOUT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::{AuthMode, SessionId, SslContextIndex};

/// Time allowed for the certificate store commands.
pub const CERT_TIMEOUT: Duration = Duration::from_secs(120);

/// Time allowed for the socket service to answer.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(120);

/// Time allowed between the chunks of one `AT+CCHRECV` read.
pub const RECV_CHUNK_TIMEOUT: Duration = Duration::from_millis(1000);

/// How the socket service exchanges data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    /// Commands and data share the link (`AT+CCHSEND` / `AT+CCHRECV`).
    #[default]
    Normal = 0,
    /// The link carries socket data only.
    Transparent = 1,
}

/// The `AT+CSSLCFG` / `AT+CCERT*` / `AT+CCH*` command set.
pub struct SslCommands<'a> {
    channel: &'a mut dyn AtChannel,
}

impl<'a> SslCommands<'a> {
    pub fn new(channel: &'a mut dyn AtChannel) -> Self {
        SslCommands { channel }
    }

    fn configure(&mut self, key: &str, ctx: SslContextIndex, value: &str) -> ClientResult<()> {
        let timeout = self.channel.config().default_timeout();
        let command = format!("AT+CSSLCFG=\"{}\",{},{}", key, ctx, value);
        self.channel.command(&command, timeout)?;
        Ok(())
    }

    pub fn set_ssl_version(&mut self, ctx: SslContextIndex, version: u8) -> ClientResult<()> {
        self.configure("sslversion", ctx, &version.to_string())
    }

    pub fn set_auth_mode(&mut self, ctx: SslContextIndex, mode: AuthMode) -> ClientResult<()> {
        self.configure("authmode", ctx, &mode.code().to_string())
    }

    pub fn set_ignore_local_time(
        &mut self,
        ctx: SslContextIndex,
        ignore: bool,
    ) -> ClientResult<()> {
        self.configure("ignorelocaltime", ctx, if ignore { "1" } else { "0" })
    }

    /// Handshake timeout in seconds.
    pub fn set_negotiate_time(&mut self, ctx: SslContextIndex, seconds: u16) -> ClientResult<()> {
        self.configure("negotiatetime", ctx, &seconds.to_string())
    }

    pub fn set_ca_cert(&mut self, ctx: SslContextIndex, slot: &str) -> ClientResult<()> {
        self.configure("cacert", ctx, &quote(slot))
    }

    pub fn set_client_cert(&mut self, ctx: SslContextIndex, slot: &str) -> ClientResult<()> {
        self.configure("clientcert", ctx, &quote(slot))
    }

    pub fn set_client_key(&mut self, ctx: SslContextIndex, slot: &str) -> ClientResult<()> {
        self.configure("clientkey", ctx, &quote(slot))
    }

    pub fn set_password(&mut self, ctx: SslContextIndex, slot: &str) -> ClientResult<()> {
        self.configure("password", ctx, &quote(slot))
    }

    pub fn set_sni(&mut self, ctx: SslContextIndex, enable: bool) -> ClientResult<()> {
        self.configure("enableSNI", ctx, if enable { "1" } else { "0" })
    }

    /// Store `data` in `slot` (`AT+CCERTDOWN`). Fails if the slot is taken.
    pub fn cert_download(&mut self, data: &[u8], slot: &str) -> ClientResult<()> {
        validate_slot(slot)?;
        let upload = Upload::new(format!("AT+CCERTDOWN={},{}", quote(slot), data.len()), data)
            .prompt_timeout(CERT_TIMEOUT);
        self.channel.upload(&upload)?;
        debug!("Stored {} bytes in {:?}", data.len(), slot);
        Ok(())
    }

    /// Whether `slot` appears in the store listing (`AT+CCERTLIST`).
    pub fn cert_exists(&mut self, slot: &str) -> ClientResult<bool> {
        validate_slot(slot)?;
        self.channel.send("AT+CCERTLIST")?;
        let quoted = quote(slot);
        match self.channel.wait(&[quoted.as_str()], CERT_TIMEOUT, true, true) {
            MatchOutcome::MatchedPattern(_) => {
                let timeout = self.channel.config().default_timeout();
                self.channel.clear(timeout);
                Ok(true)
            }
            MatchOutcome::Success => Ok(false),
            MatchOutcome::Failure => Err(AtError::DeviceReportedFailure.into()),
            MatchOutcome::TimedOut => Err(AtError::TimedOut.into()),
        }
    }

    /// Remove `slot` from the store (`AT+CCERTDELE`).
    pub fn cert_delete(&mut self, slot: &str) -> ClientResult<()> {
        validate_slot(slot)?;
        self.channel
            .command(&format!("AT+CCERTDELE={}", quote(slot)), CERT_TIMEOUT)?;
        Ok(())
    }

    /// Replace whatever `slot` holds with `data`.
    ///
    /// Not atomic: a failure after the delete leaves the slot empty. Calling
    /// again converges, since a missing slot is simply written.
    pub fn cert_overwrite(&mut self, data: &[u8], slot: &str) -> ClientResult<()> {
        if self.cert_exists(slot)? {
            debug!("Slot {:?} exists, deleting", slot);
            self.cert_delete(slot)?;
        }
        self.cert_download(data, slot)
    }

    /// Bind an SSL context to a socket session (`AT+CCHSSLCFG`).
    pub fn set_session_context(
        &mut self,
        session: SessionId,
        ctx: SslContextIndex,
    ) -> ClientResult<()> {
        let timeout = self.channel.config().default_timeout();
        self.channel
            .command(&format!("AT+CCHSSLCFG={},{}", session, ctx), timeout)?;
        Ok(())
    }

    /// Configure `AT+CCHSET`.
    ///
    /// `report_send` adds a `+CCHSEND:` result after each send. `cache_recv`
    /// keeps received data in the modem until it is read with `AT+CCHRECV`
    /// instead of pushing it out as it arrives.
    pub fn set_report_mode(&mut self, report_send: bool, cache_recv: bool) -> ClientResult<()> {
        let command = format!(
            "AT+CCHSET={},{}",
            u8::from(report_send),
            u8::from(cache_recv)
        );
        self.channel.command(&command, SOCKET_TIMEOUT)?;
        Ok(())
    }

    pub fn set_data_mode(&mut self, mode: DataMode) -> ClientResult<()> {
        self.channel
            .command(&format!("AT+CCHMODE={}", mode as u8), SOCKET_TIMEOUT)?;
        Ok(())
    }

    /// Start the socket service (`AT+CCHSTART`).
    pub fn start(&mut self) -> ClientResult<()> {
        self.channel.send("AT+CCHSTART")?;
        match self.channel.wait(&["+CCHSTART: "], SOCKET_TIMEOUT, false, true) {
            MatchOutcome::MatchedPattern(_) => Ok(self.channel.code_line()?),
            MatchOutcome::Failure => {
                // The error code may follow the ERROR line.
                let grace = Duration::from_millis(100);
                match self.channel.wait(&["+CCHSTART: "], grace, false, true) {
                    MatchOutcome::MatchedPattern(_) => Ok(self.channel.code_line()?),
                    _ => Err(AtError::DeviceReportedFailure.into()),
                }
            }
            other => Ok(other.expect_success()?),
        }
    }

    /// Stop the socket service (`AT+CCHSTOP`).
    pub fn stop(&mut self) -> ClientResult<()> {
        self.channel.send("AT+CCHSTOP")?;
        match self.channel.wait(&["+CCHSTOP: "], SOCKET_TIMEOUT, false, true) {
            MatchOutcome::MatchedPattern(_) => Ok(self.channel.code_line()?),
            other => Ok(other.expect_success()?),
        }
    }

    /// Open a session to `host:port` (`AT+CCHOPEN`).
    pub fn open(&mut self, session: SessionId, host: &str, port: u16) -> ClientResult<()> {
        if host.is_empty() || host.contains(['"', '\r', '\n']) {
            return Err(ClientError::InvalidArgument(format!(
                "invalid host {:?}",
                host
            )));
        }
        self.channel
            .send(&format!("AT+CCHOPEN={},\"{}\",{}", session, host, port))?;
        let outcome = self.channel.wait(&["+CCHOPEN: "], SOCKET_TIMEOUT, false, true);
        self.session_result(outcome)
    }

    /// Close a session (`AT+CCHCLOSE`).
    pub fn close(&mut self, session: SessionId) -> ClientResult<()> {
        self.channel.send(&format!("AT+CCHCLOSE={}", session))?;
        let outcome = self.channel.wait(&["+CCHCLOSE: "], SOCKET_TIMEOUT, false, true);
        self.session_result(outcome)
    }

    /// Write `data` to a session (`AT+CCHSEND`).
    pub fn send(&mut self, session: SessionId, data: &[u8]) -> ClientResult<()> {
        if data.is_empty() {
            return Err(ClientError::InvalidArgument(
                "empty data for AT+CCHSEND".to_string(),
            ));
        }
        let upload = Upload::new(format!("AT+CCHSEND={},{}", session, data.len()), data);
        self.channel.upload(&upload)?;
        Ok(())
    }

    /// Bytes the modem holds for `session` (`AT+CCHRECV?`).
    ///
    /// The answer lists both sessions; anything but session 0 reads the
    /// second count.
    pub fn available(&mut self, session: SessionId) -> ClientResult<usize> {
        self.channel.send("AT+CCHRECV?")?;
        match self
            .channel
            .wait(&["+CCHRECV: LEN,"], DEFAULT_TRANSFER_TIMEOUT, false, true)
        {
            MatchOutcome::MatchedPattern(_) => {}
            other => {
                other.expect_success()?;
                return Err(AtError::TimedOut.into());
            }
        }
        let (first, second) = {
            let mut stream = self.channel.stream();
            let first = stream.parse_len()?;
            stream.find(b',')?;
            (first, stream.parse_len()?)
        };
        let timeout = self.channel.config().default_timeout();
        self.channel.clear(timeout);
        Ok(if session.0 == 0 { first } else { second })
    }

    /// Read up to `buf.len()` cached bytes from a session (`AT+CCHRECV`).
    ///
    /// The data arrives as `+CCHRECV: DATA,<session>,<len>` chunks, each
    /// followed by its raw bytes. A zero-length chunk or a closing
    /// `+CCHRECV: <session>,<code>` line ends the read. Returns the number of
    /// bytes written.
    pub fn recv(&mut self, session: SessionId, buf: &mut [u8]) -> ClientResult<usize> {
        self.channel
            .send(&format!("AT+CCHRECV={},{}", session, buf.len()))?;
        match self.channel.wait(&["+CCHRECV: "], SOCKET_TIMEOUT, true, true) {
            MatchOutcome::Success => {}
            MatchOutcome::MatchedPattern(_) => {
                // Answered with `<session>,<code>` instead of OK.
                let code = self.session_code()?;
                let timeout = self.channel.config().default_timeout();
                self.channel.clear(timeout);
                check_code(code)?;
                return Err(AtError::DeviceReportedFailure.into());
            }
            other => {
                other.expect_success()?;
                return Err(AtError::TimedOut.into());
            }
        }

        let mut filled = 0;
        let mut overflow = 0;
        loop {
            match self.channel.wait(&["+CCHRECV: "], RECV_CHUNK_TIMEOUT, false, true) {
                MatchOutcome::MatchedPattern(_) => {}
                other => {
                    other.expect_success()?;
                    return Err(AtError::TimedOut.into());
                }
            }
            let mut stream = self.channel.stream();
            let first = stream.read_byte()?;
            if first != b'D' {
                stream.unread(first);
                drop(stream);
                check_code(self.session_code()?)?;
                break;
            }
            // `DATA,<session>,<len>`
            stream.find(b',')?;
            stream.parse_int()?;
            stream.find(b',')?;
            let len = stream.parse_len()?;
            stream.find(b'\n')?;
            if len == 0 {
                break;
            }
            let room = buf.len() - filled;
            if len > room {
                stream.read_into(&mut buf[filled..])?;
                stream.skip(len - room)?;
                filled = buf.len();
                overflow += len - room;
            } else {
                stream.read_into(&mut buf[filled..filled + len])?;
                filled += len;
            }
            debug!("Received {} bytes on session {}", len, session);
        }

        if overflow > 0 {
            warn!("Session {} returned {} bytes beyond the buffer", session, overflow);
            return Err(AtError::OutOfStorage {
                capacity: buf.len(),
                declared: filled + overflow,
            }
            .into());
        }
        Ok(filled)
    }

    /// Map `<session>,<code>` after a `+CCHOPEN:` or `+CCHCLOSE:` match.
    fn session_result(&mut self, outcome: MatchOutcome) -> ClientResult<()> {
        match outcome {
            MatchOutcome::MatchedPattern(_) => Ok(self.channel.indexed_code_line()?),
            other => Ok(other.expect_success()?),
        }
    }

    /// Read `<session>,<code>` up to the end of the line.
    fn session_code(&mut self) -> ClientResult<i64> {
        let mut stream = self.channel.stream();
        stream.parse_int()?;
        stream.find(b',')?;
        let code = stream.parse_int()?;
        stream.find(b'\n')?;
        Ok(code)
    }
}

fn quote(slot: &str) -> String {
    format!("\"{}\"", slot)
}

fn validate_slot(slot: &str) -> ClientResult<()> {
    if slot.is_empty() || slot.contains(['"', '\r', '\n']) {
        return Err(ClientError::InvalidArgument(format!(
            "invalid certificate slot name {:?}",
            slot
        )));
    }
    Ok(())
}

/// Handshake parameters applied by [`SecureContext::config_ssl`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslSettings {
    /// `0` SSL3.0, `1` TLS1.0, `2` TLS1.1, `3` TLS1.2, `4` all.
    pub version: u8,
    /// Accept certificates regardless of the modem clock.
    pub ignore_local_time: bool,
    /// Handshake timeout in seconds.
    pub negotiate_time: u16,
}

impl Default for SslSettings {
    fn default() -> Self {
        SslSettings {
            version: 4,
            ignore_local_time: true,
            negotiate_time: 300,
        }
    }
}

/// Slot names for client authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSlots {
    pub cert: String,
    pub key: String,
    pub password: String,
}

/// One SSL context and the slots bound to it.
#[derive(Debug, Clone, Default)]
pub struct SecureContext {
    index: SslContextIndex,
    ca: Option<String>,
    client: Option<ClientSlots>,
}

impl SecureContext {
    pub fn new(index: SslContextIndex) -> Self {
        SecureContext {
            index,
            ..Default::default()
        }
    }

    pub fn index(&self) -> SslContextIndex {
        self.index
    }

    /// Mode implied by the slots bound so far.
    pub fn auth_mode(&self) -> AuthMode {
        AuthMode::for_slots(self.ca.is_some(), self.client.is_some())
    }

    pub fn ca_slot(&self) -> Option<&str> {
        self.ca.as_deref()
    }

    pub fn client_slots(&self) -> Option<&ClientSlots> {
        self.client.as_ref()
    }

    /// Overwrite the CA certificate and bind it.
    pub fn write_ca_cert(
        &mut self,
        channel: &mut dyn AtChannel,
        cert: &[u8],
        slot: &str,
    ) -> ClientResult<()> {
        SslCommands::new(channel).cert_overwrite(cert, slot)?;
        self.set_ca_cert(channel, slot)
    }

    /// Bind an already stored CA certificate.
    pub fn set_ca_cert(&mut self, channel: &mut dyn AtChannel, slot: &str) -> ClientResult<()> {
        SslCommands::new(channel).set_ca_cert(self.index, slot)?;
        self.ca = Some(slot.to_string());
        self.apply_auth_mode(channel)
    }

    /// Overwrite the client certificate, key and key password, then bind them.
    pub fn write_client_cert_and_key(
        &mut self,
        channel: &mut dyn AtChannel,
        cert: &[u8],
        key: &[u8],
        password: &[u8],
        slots: &ClientSlots,
    ) -> ClientResult<()> {
        let mut ssl = SslCommands::new(channel);
        ssl.cert_overwrite(cert, &slots.cert)?;
        ssl.cert_overwrite(key, &slots.key)?;
        ssl.cert_overwrite(password, &slots.password)?;
        self.set_client_cert_and_key(channel, slots)
    }

    /// Bind already stored client credentials.
    pub fn set_client_cert_and_key(
        &mut self,
        channel: &mut dyn AtChannel,
        slots: &ClientSlots,
    ) -> ClientResult<()> {
        let mut ssl = SslCommands::new(channel);
        ssl.set_client_cert(self.index, &slots.cert)?;
        ssl.set_client_key(self.index, &slots.key)?;
        ssl.set_password(self.index, &slots.password)?;
        self.client = Some(slots.clone());
        self.apply_auth_mode(channel)
    }

    /// Bind CA and client credentials for mutual authentication.
    pub fn set_certs(
        &mut self,
        channel: &mut dyn AtChannel,
        ca_slot: &str,
        slots: &ClientSlots,
    ) -> ClientResult<()> {
        self.set_ca_cert(channel, ca_slot)?;
        self.set_client_cert_and_key(channel, slots)
    }

    pub fn config_ssl(
        &self,
        channel: &mut dyn AtChannel,
        settings: &SslSettings,
    ) -> ClientResult<()> {
        let mut ssl = SslCommands::new(channel);
        ssl.set_ssl_version(self.index, settings.version)?;
        ssl.set_ignore_local_time(self.index, settings.ignore_local_time)?;
        ssl.set_negotiate_time(self.index, settings.negotiate_time)?;
        Ok(())
    }

    fn apply_auth_mode(&self, channel: &mut dyn AtChannel) -> ClientResult<()> {
        let mode = self.auth_mode();
        info!("SSL context {} auth mode {:?}", self.index, mode);
        SslCommands::new(channel).set_auth_mode(self.index, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a76xx_at::mock::MockTransport;
    use a76xx_at::{EngineConfig, ModemSerial};

    fn modem() -> (ModemSerial<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let config = EngineConfig {
            poll_interval_ms: 0,
            byte_timeout_ms: 20,
            default_timeout_ms: 100,
            ..EngineConfig::default()
        };
        (ModemSerial::with_config(mock.clone(), config), mock)
    }

    fn commands(mock: &MockTransport) -> Vec<String> {
        mock.written_string()
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_cert_exists_matches_quoted_name() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| {
            b"\r\n+CCERTLIST: \"ca.pem.old\"\r\n+CCERTLIST: \"ca.pem\"\r\n\r\nOK\r\n".to_vec()
        });
        assert!(SslCommands::new(&mut modem).cert_exists("ca.pem").unwrap());
        assert_eq!(mock.pending(), 0);

        mock.set_responder(|_| b"\r\n+CCERTLIST: \"ca.pem.old\"\r\n\r\nOK\r\n".to_vec());
        assert!(!SslCommands::new(&mut modem).cert_exists("ca.pem").unwrap());
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let (mut modem, mock) = modem();
        let err = SslCommands::new(&mut modem).cert_delete("a\"b").unwrap_err();
        assert!(matches!(err, crate::ClientError::InvalidArgument(_)));
        assert!(mock.written_string().is_empty());
    }

    #[test]
    fn test_auth_mode_follows_bound_slots() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| b"\r\nOK\r\n".to_vec());
        let mut ctx = SecureContext::new(SslContextIndex(2));
        let slots = ClientSlots {
            cert: "client.pem".into(),
            key: "client.key".into(),
            password: "client.pwd".into(),
        };

        ctx.set_client_cert_and_key(&mut modem, &slots).unwrap();
        assert_eq!(ctx.auth_mode(), AuthMode::ClientOnly);
        ctx.set_ca_cert(&mut modem, "ca.pem").unwrap();
        assert_eq!(ctx.auth_mode(), AuthMode::Mutual);

        assert_eq!(
            commands(&mock),
            vec![
                "AT+CSSLCFG=\"clientcert\",2,\"client.pem\"",
                "AT+CSSLCFG=\"clientkey\",2,\"client.key\"",
                "AT+CSSLCFG=\"password\",2,\"client.pwd\"",
                "AT+CSSLCFG=\"authmode\",2,3",
                "AT+CSSLCFG=\"cacert\",2,\"ca.pem\"",
                "AT+CSSLCFG=\"authmode\",2,2",
            ]
        );
    }

    #[test]
    fn test_config_ssl_defaults() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| b"\r\nOK\r\n".to_vec());
        SecureContext::new(SslContextIndex(0))
            .config_ssl(&mut modem, &SslSettings::default())
            .unwrap();
        assert_eq!(
            commands(&mock),
            vec![
                "AT+CSSLCFG=\"sslversion\",0,4",
                "AT+CSSLCFG=\"ignorelocaltime\",0,1",
                "AT+CSSLCFG=\"negotiatetime\",0,300",
            ]
        );
    }

    #[test]
    fn test_recv_joins_chunks_until_empty_chunk() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| {
            b"\r\nOK\r\n\r\n+CCHRECV: DATA,0,5\r\nhello\r\n\
              +CCHRECV: DATA,0,6\r\n world\r\n+CCHRECV: DATA,0,0\r\n"
                .to_vec()
        });
        let mut buf = [0u8; 16];
        let read = SslCommands::new(&mut modem)
            .recv(SessionId(0), &mut buf)
            .unwrap();
        assert_eq!(&buf[..read], b"hello world");
        assert_eq!(commands(&mock), vec!["AT+CCHRECV=0,16"]);
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_recv_ends_on_session_result() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| {
            b"\r\nOK\r\n\r\n+CCHRECV: DATA,1,4\r\n\r\nOK\r\n\r\n+CCHRECV: 1,0\r\n".to_vec()
        });
        let mut buf = [0u8; 8];
        let read = SslCommands::new(&mut modem)
            .recv(SessionId(1), &mut buf)
            .unwrap();
        // Payload bytes that look like a terminator are data.
        assert_eq!(&buf[..read], b"\r\nOK");
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_recv_inline_error() {
        let (mut modem, mock) = modem();
        mock.set_responder(|line| {
            if line.starts_with("AT+CCHRECV=") {
                b"\r\n+CCHRECV: 0,4\r\nERROR\r\n".to_vec()
            } else {
                b"\r\nOK\r\n".to_vec()
            }
        });
        let mut buf = [0u8; 8];
        let err = SslCommands::new(&mut modem)
            .recv(SessionId(0), &mut buf)
            .unwrap_err();
        assert!(matches!(err, crate::ClientError::At(AtError::DeviceCode(4))));
        assert_eq!(mock.pending(), 0);
        modem.command("AT", Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_recv_overflow_keeps_stream_in_sync() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| {
            b"\r\nOK\r\n\r\n+CCHRECV: DATA,0,6\r\nabcdef\r\n+CCHRECV: DATA,0,0\r\n".to_vec()
        });
        let mut buf = [0u8; 4];
        let err = SslCommands::new(&mut modem)
            .recv(SessionId(0), &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::ClientError::At(AtError::OutOfStorage {
                capacity: 4,
                declared: 6
            })
        ));
        assert_eq!(&buf, b"abcd");
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_send_uploads_after_prompt() {
        let (mut modem, mock) = modem();
        mock.set_responder(|line| {
            if line.starts_with("AT+CCHSEND=") {
                b"\r\n>\r\nOK\r\n".to_vec()
            } else {
                Vec::new()
            }
        });
        SslCommands::new(&mut modem)
            .send(SessionId(0), b"GET / HTTP/1.1")
            .unwrap();
        assert_eq!(mock.written_string(), "AT+CCHSEND=0,14\r\nGET / HTTP/1.1");
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_available_picks_session_count() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| b"\r\n+CCHRECV: LEN,12,30\r\n\r\nOK\r\n".to_vec());
        assert_eq!(SslCommands::new(&mut modem).available(SessionId(0)).unwrap(), 12);
        assert_eq!(mock.pending(), 0);
        assert_eq!(SslCommands::new(&mut modem).available(SessionId(1)).unwrap(), 30);
    }

    #[test]
    fn test_open_reports_session_error() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| b"\r\nOK\r\n\r\n+CCHOPEN: 0,4\r\n".to_vec());
        let err = SslCommands::new(&mut modem)
            .open(SessionId(0), "example.com", 443)
            .unwrap_err();
        assert!(matches!(err, crate::ClientError::At(AtError::DeviceCode(4))));
        assert_eq!(commands(&mock), vec!["AT+CCHOPEN=0,\"example.com\",443"]);
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_start_reads_code_after_error() {
        let (mut modem, mock) = modem();
        mock.set_responder(|_| b"\r\nERROR\r\n\r\n+CCHSTART: 2\r\n".to_vec());
        let err = SslCommands::new(&mut modem).start().unwrap_err();
        assert!(matches!(err, crate::ClientError::At(AtError::DeviceCode(2))));
        assert_eq!(mock.pending(), 0);
    }
}
