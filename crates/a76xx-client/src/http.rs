//! HTTP(S) over the modem's built-in client (`AT+HTTP*`).

use std::time::Duration;

use a76xx_at::{
    AtChannel, AtError, Download, HandlerId, MatchOutcome, NotificationHandler, Trailer, UrcEvent,
    Upload,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::session::SslContextIndex;
use crate::ssl::SecureContext;

pub const URC_PEER_CLOSED: &str = "+HTTP_PEER_CLOSED";
pub const URC_NO_NET: &str = "+HTTP_NONET_EVENT";

/// Firmware limit on the `USERDATA` parameter.
pub const MAX_HEADER_LEN: usize = 256;

/// Separator between custom headers inside `USERDATA`.
const HEADER_SEPARATOR: &str = "\\r\\n";

/// Prompt announcing that `AT+HTTPDATA` accepts the body.
const DATA_PROMPT: &str = "DOWNLOAD";
const DATA_PROMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time the device has to finish an `AT+HTTPACTION`.
const ACTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Request methods understood by `AT+HTTPACTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get = 0,
    Post = 1,
    Head = 2,
    Delete = 3,
    Put = 4,
}

impl HttpMethod {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Result of `AT+HTTPACTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionResult {
    pub status: u16,
    pub body_length: usize,
}

/// The `AT+HTTP*` command set.
pub struct HttpCommands<'a> {
    channel: &'a mut dyn AtChannel,
}

impl<'a> HttpCommands<'a> {
    pub fn new(channel: &'a mut dyn AtChannel) -> Self {
        HttpCommands { channel }
    }

    pub fn init(&mut self) -> ClientResult<()> {
        let timeout = self.channel.config().default_timeout();
        self.channel.command("AT+HTTPINIT", timeout)?;
        Ok(())
    }

    pub fn term(&mut self) -> ClientResult<()> {
        let timeout = self.channel.config().default_timeout();
        self.channel.command("AT+HTTPTERM", timeout)?;
        Ok(())
    }

    fn set_text(&mut self, key: &str, value: &str) -> ClientResult<()> {
        if value.contains(['"', '\r', '\n']) {
            return Err(ClientError::InvalidArgument(format!(
                "{} value {:?} cannot be quoted",
                key, value
            )));
        }
        let timeout = self.channel.config().default_timeout();
        self.channel
            .command(&format!("AT+HTTPPARA=\"{}\",\"{}\"", key, value), timeout)?;
        Ok(())
    }

    fn set_number(&mut self, key: &str, value: u32) -> ClientResult<()> {
        let timeout = self.channel.config().default_timeout();
        self.channel
            .command(&format!("AT+HTTPPARA=\"{}\",{}", key, value), timeout)?;
        Ok(())
    }

    pub fn set_url(&mut self, url: &str) -> ClientResult<()> {
        self.set_text("URL", url)
    }

    /// Connection timeout, 20 to 120 seconds.
    pub fn set_connect_timeout(&mut self, seconds: u8) -> ClientResult<()> {
        self.set_number("CONNECTTO", u32::from(seconds))
    }

    /// Receive timeout, 2 to 120 seconds.
    pub fn set_receive_timeout(&mut self, seconds: u8) -> ClientResult<()> {
        self.set_number("RECVTO", u32::from(seconds))
    }

    pub fn set_content_type(&mut self, content_type: &str) -> ClientResult<()> {
        self.set_text("CONTENT", content_type)
    }

    pub fn set_accept(&mut self, accept: &str) -> ClientResult<()> {
        self.set_text("ACCEPT", accept)
    }

    pub fn set_ssl_context(&mut self, ctx: SslContextIndex) -> ClientResult<()> {
        self.set_number("SSLCFG", u32::from(ctx.0))
    }

    /// Custom request headers.
    pub fn set_user_data(&mut self, headers: &str) -> ClientResult<()> {
        self.set_text("USERDATA", headers)
    }

    pub fn set_read_mode(&mut self, mode: u8) -> ClientResult<()> {
        self.set_number("READMODE", u32::from(mode))
    }

    /// Upload a request body with `AT+HTTPDATA`.
    pub fn data(&mut self, body: &[u8], timeout_secs: u16) -> ClientResult<()> {
        let upload = Upload::new(format!("AT+HTTPDATA={},{}", body.len(), timeout_secs), body)
            .prompt(DATA_PROMPT)
            .prompt_timeout(DATA_PROMPT_TIMEOUT)
            .confirm_timeout(
                Duration::from_secs(u64::from(timeout_secs)) + Duration::from_secs(1),
            );
        self.channel.upload(&upload)?;
        Ok(())
    }

    /// Run a request and wait for `+HTTPACTION: <method>,<status>,<length>`.
    pub fn action(&mut self, method: HttpMethod) -> ClientResult<ActionResult> {
        let timeout = self.channel.config().default_timeout();
        self.channel
            .command(&format!("AT+HTTPACTION={}", method.code()), timeout)?;
        match self.channel.wait(&["+HTTPACTION: "], ACTION_TIMEOUT, false, true) {
            MatchOutcome::MatchedPattern(_) => {}
            other => {
                other.expect_success()?;
                return Err(AtError::TimedOut.into());
            }
        }
        let mut stream = self.channel.stream();
        stream.find(b',')?;
        let status = stream.parse_int()?;
        stream.find(b',')?;
        let body_length = stream.parse_len()?;
        stream.find(b'\n')?;
        let status = u16::try_from(status)
            .map_err(|_| AtError::Parse(format!("invalid HTTP status {}", status)))?;
        Ok(ActionResult {
            status,
            body_length,
        })
    }

    /// Response headers of the last request.
    pub fn head(&mut self) -> ClientResult<Vec<u8>> {
        Ok(self.channel.download(&head_request())?)
    }

    /// Unread body length of the last request, from `AT+HTTPREAD?`.
    pub fn content_length(&mut self) -> ClientResult<usize> {
        self.channel.send("AT+HTTPREAD?")?;
        let timeout = self.channel.config().default_timeout();
        match self.channel.wait(&["+HTTPREAD: LEN,"], timeout, false, true) {
            MatchOutcome::MatchedPattern(_) => {
                let len = self.channel.parse_int_clear(timeout)?;
                usize::try_from(len)
                    .map_err(|_| AtError::Parse(format!("invalid length {}", len)).into())
            }
            other => {
                other.expect_success()?;
                Err(AtError::TimedOut.into())
            }
        }
    }

    /// Read `len` body bytes from offset 0.
    pub fn read(&mut self, len: usize) -> ClientResult<Vec<u8>> {
        Ok(self.channel.download(&read_request(len))?)
    }
}

fn head_request() -> Download<'static> {
    Download::new("AT+HTTPHEAD", "+HTTPHEAD: ")
        .header_timeout(ACTION_TIMEOUT)
        .trailer(Trailer::Terminator)
}

fn read_request(len: usize) -> Download<'static> {
    Download::new(format!("AT+HTTPREAD=0,{}", len), "+HTTPREAD: ")
        .expect(len)
        .header_timeout(ACTION_TIMEOUT)
        .trailer(Trailer::Pattern("+HTTPREAD: 0"))
}

/// HTTP client façade for one server.
///
/// Registers the HTTP URC handlers on creation and removes them when dropped.
pub struct HttpClient<'a> {
    channel: &'a mut dyn AtChannel,
    server: String,
    port: u16,
    use_ssl: bool,
    user_agent: Option<String>,
    headers: String,
    secure: SecureContext,
    handlers: Vec<HandlerId>,
    last: Option<ActionResult>,
}

impl<'a> HttpClient<'a> {
    /// `server` may carry its own `http://` or `https://` scheme; otherwise
    /// `use_ssl` selects one.
    pub fn new(
        channel: &'a mut dyn AtChannel,
        server: impl Into<String>,
        port: u16,
        use_ssl: bool,
        user_agent: Option<&str>,
    ) -> ClientResult<Self> {
        let mut client = HttpClient {
            channel,
            server: server.into(),
            port,
            use_ssl,
            user_agent: user_agent.map(str::to_string),
            headers: String::new(),
            secure: SecureContext::new(SslContextIndex(0)),
            handlers: Vec::new(),
            last: None,
        };
        client.reset_header();
        for (pattern, event) in [
            (URC_PEER_CLOSED, UrcEvent::HttpPeerClosed),
            (URC_NO_NET, UrcEvent::HttpNoNet),
        ] {
            let id = client
                .channel
                .register(Box::new(NotificationHandler::new(pattern, event)))?;
            client.handlers.push(id);
        }
        Ok(client)
    }

    pub fn with_ssl_context(mut self, ctx: SslContextIndex) -> Self {
        self.secure = SecureContext::new(ctx);
        self
    }

    fn commands(&mut self) -> HttpCommands<'_> {
        HttpCommands::new(&mut *self.channel)
    }

    pub fn begin(&mut self) -> ClientResult<()> {
        self.commands().init()?;
        if self.use_ssl {
            let ctx = self.secure.index();
            self.commands().set_ssl_context(ctx)?;
        }
        Ok(())
    }

    pub fn end(&mut self) -> ClientResult<()> {
        self.commands().term()
    }

    /// Restore the default headers: `Host`, plus `User-Agent` when configured.
    pub fn reset_header(&mut self) {
        self.headers = format!("Host: {}{}", self.host(), HEADER_SEPARATOR);
        if let Some(agent) = &self.user_agent {
            self.headers
                .push_str(&format!("User-Agent: {}{}", agent, HEADER_SEPARATOR));
        }
    }

    /// Add a custom header. The headers are left unchanged if the result
    /// would exceed [`MAX_HEADER_LEN`].
    pub fn add_header(&mut self, name: &str, value: &str) -> ClientResult<()> {
        let entry = format!("{}: {}{}", name, value, HEADER_SEPARATOR);
        if self.headers.len() + entry.len() > MAX_HEADER_LEN {
            return Err(ClientError::HeaderTooLong {
                max: MAX_HEADER_LEN,
            });
        }
        self.headers.push_str(&entry);
        Ok(())
    }

    pub fn add_basic_auth(&mut self, username: &str, password: &str) -> ClientResult<()> {
        let token = STANDARD.encode(format!("{}:{}", username, password));
        self.add_header("Authorization", &format!("Basic {}", token))
    }

    pub fn headers(&self) -> &str {
        &self.headers
    }

    /// `GET` a path given without its leading `/`. Returns the status.
    pub fn get(&mut self, path: &str, accept: Option<&str>) -> ClientResult<u16> {
        self.request(HttpMethod::Get, path, None, None, accept)
    }

    /// `POST` a body. `content_type` defaults to `text/plain`.
    pub fn post(
        &mut self,
        path: &str,
        body: &[u8],
        content_type: Option<&str>,
        accept: Option<&str>,
    ) -> ClientResult<u16> {
        self.request(HttpMethod::Post, path, Some(body), content_type, accept)
    }

    fn request(
        &mut self,
        method: HttpMethod,
        path: &str,
        body: Option<&[u8]>,
        content_type: Option<&str>,
        accept: Option<&str>,
    ) -> ClientResult<u16> {
        let url = format!("{}:{}/{}", self.base_url(), self.port, path);
        let headers = self.headers.clone();
        self.last = None;

        let mut http = self.commands();
        http.set_url(&url)?;
        http.set_content_type(content_type.unwrap_or("text/plain"))?;
        http.set_accept(accept.unwrap_or("*/*"))?;
        http.set_user_data(&headers)?;
        if let Some(body) = body.filter(|b| !b.is_empty()) {
            http.data(body, 30)?;
        }
        let result = http.action(method)?;
        info!(
            "{:?} {} -> {} ({} bytes)",
            method, url, result.status, result.body_length
        );
        self.last = Some(result);
        Ok(result.status)
    }

    /// Status of the last request.
    pub fn response_status(&self) -> Option<u16> {
        self.last.map(|r| r.status)
    }

    /// Body length of the last request.
    pub fn response_body_length(&self) -> Option<usize> {
        self.last.map(|r| r.body_length)
    }

    /// Fail with [`ClientError::HttpStatus`] unless the last status was 2xx.
    pub fn error_for_status(&self) -> ClientResult<u16> {
        match self.response_status() {
            Some(status) if (200..300).contains(&status) => Ok(status),
            Some(status) => Err(ClientError::HttpStatus(status)),
            None => Err(ClientError::InvalidArgument("no request made".to_string())),
        }
    }

    pub fn response_header(&mut self) -> ClientResult<String> {
        let head = self.commands().head()?;
        Ok(String::from_utf8_lossy(&head).to_string())
    }

    pub fn response_body(&mut self) -> ClientResult<Vec<u8>> {
        let len = self.response_body_length().unwrap_or(0);
        if len == 0 {
            debug!("Empty response body");
            return Ok(Vec::new());
        }
        self.commands().read(len)
    }

    pub fn secure_parts(&mut self) -> (&mut SecureContext, &mut dyn AtChannel) {
        (&mut self.secure, &mut *self.channel)
    }

    fn host(&self) -> &str {
        self.server
            .strip_prefix("https://")
            .or_else(|| self.server.strip_prefix("http://"))
            .unwrap_or(&self.server)
    }

    fn base_url(&self) -> String {
        if self.server.starts_with("http://") || self.server.starts_with("https://") {
            self.server.clone()
        } else if self.use_ssl {
            format!("https://{}", self.server)
        } else {
            format!("http://{}", self.server)
        }
    }
}

impl Drop for HttpClient<'_> {
    fn drop(&mut self) {
        for id in self.handlers.drain(..) {
            self.channel.deregister(id);
        }
    }
}
