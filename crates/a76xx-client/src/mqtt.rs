//! MQTT over the modem's built-in client (`AT+CMQTT*`).
//!
//! Topics and payloads are pushed with the upload handshake. Inbound messages
//! arrive as a `+CMQTTRXSTART` block that the [`MqttRxHandler`] decodes into
//! the client's inbox while whatever wait is in progress carries on.

use std::time::Duration;

use a76xx_at::{
    shared_queue, AtChannel, AtError, AtResult, Confirm, FixedField, FramedMessage, HandlerId,
    MatchOutcome, NotificationHandler, OverflowPolicy, SharedQueue, Stream, UrcEvent, UrcHandler,
    Upload,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::{ClientIndex, SessionId, SslContextIndex};
use crate::ssl::SecureContext;

/// Topic storage per inbound message, including the terminator.
pub const MQTT_TOPIC_CAPACITY: usize = 32;

/// Payload storage per inbound message, including the terminator.
pub const MQTT_PAYLOAD_CAPACITY: usize = 64;

pub const URC_MESSAGE_RX: &str = "+CMQTTRXSTART: ";
pub const URC_CONNECTION_LOST: &str = "+CMQTTCONNLOST: ";
pub const URC_NO_NET: &str = "+CMQTTNONET";

/// Timeout for service and connection commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(12);

/// Added to device-side timeouts before giving up on the result line.
const RESPONSE_MARGIN: Duration = Duration::from_secs(2);

/// An inbound message with tail-truncated topic and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub client: ClientIndex,
    pub frame: FramedMessage<MQTT_TOPIC_CAPACITY, MQTT_PAYLOAD_CAPACITY>,
}

impl MqttMessage {
    pub fn topic(&self) -> String {
        self.frame.topic.as_str()
    }

    pub fn payload(&self) -> &[u8] {
        self.frame.body.as_bytes()
    }
}

/// Decodes `+CMQTTRXSTART` ... `+CMQTTRXEND` into a shared inbox.
pub struct MqttRxHandler {
    inbox: SharedQueue<MqttMessage>,
}

impl MqttRxHandler {
    pub fn new(inbox: SharedQueue<MqttMessage>) -> Self {
        MqttRxHandler { inbox }
    }
}

impl UrcHandler for MqttRxHandler {
    fn pattern(&self) -> &str {
        URC_MESSAGE_RX
    }

    fn event(&self) -> Option<UrcEvent> {
        Some(UrcEvent::MqttMessageRx)
    }

    fn process(&mut self, stream: &mut Stream<'_>) -> AtResult<()> {
        // <client>,<topic_len>,<payload_len>
        let client = stream.parse_int()?;
        stream.find(b',')?;
        let topic_len = stream.parse_len()?;
        stream.find(b',')?;
        let payload_len = stream.parse_len()?;
        let block_timeout = stream.byte_timeout();

        stream.wait_for("+CMQTTRXTOPIC: ", block_timeout)?;
        stream.find(b'\n')?;
        let topic = FixedField::read_from(stream, topic_len)?;

        stream.wait_for("+CMQTTRXPAYLOAD: ", block_timeout)?;
        stream.find(b'\n')?;
        let body = FixedField::read_from(stream, payload_len)?;

        stream.wait_for("+CMQTTRXEND: ", block_timeout)?;
        stream.find(b'\n')?;

        let message = MqttMessage {
            client: ClientIndex(u8::try_from(client).unwrap_or(u8::MAX)),
            frame: FramedMessage::new(topic, body),
        };
        if message.frame.is_truncated() {
            debug!(
                "Truncated MQTT message: topic {} bytes, payload {} bytes",
                topic_len, payload_len
            );
        }
        if !self.inbox.lock().push(message) {
            warn!("MQTT inbox full, dropping message");
        }
        Ok(())
    }
}

/// The `AT+CMQTT*` command set.
pub struct MqttCommands<'a> {
    channel: &'a mut dyn AtChannel,
}

impl<'a> MqttCommands<'a> {
    pub fn new(channel: &'a mut dyn AtChannel) -> Self {
        MqttCommands { channel }
    }

    /// Start the MQTT service (`AT+CMQTTSTART`).
    pub fn start(&mut self) -> ClientResult<()> {
        self.channel.send("AT+CMQTTSTART")?;
        match self.channel.wait(&["+CMQTTSTART: "], COMMAND_TIMEOUT, false, true) {
            MatchOutcome::Failure => Err(ClientError::MqttAlreadyStarted),
            outcome => self.code_after(outcome),
        }
    }

    /// Stop the MQTT service (`AT+CMQTTSTOP`).
    pub fn stop(&mut self) -> ClientResult<()> {
        self.channel.send("AT+CMQTTSTOP")?;
        match self.channel.wait(&["+CMQTTSTOP: "], COMMAND_TIMEOUT, false, true) {
            MatchOutcome::Failure => Err(ClientError::MqttAlreadyStopped),
            outcome => self.code_after(outcome),
        }
    }

    /// Acquire a client (`AT+CMQTTACCQ`). `use_ssl` selects server type 1.
    pub fn acquire_client(
        &mut self,
        client: ClientIndex,
        client_id: &str,
        use_ssl: bool,
    ) -> ClientResult<()> {
        validate_text(client_id)?;
        let command = format!(
            "AT+CMQTTACCQ={},\"{}\",{}",
            client,
            client_id,
            u8::from(use_ssl)
        );
        self.channel.send(&command)?;
        let outcome = self.channel.wait(&["+CMQTTACCQ: "], COMMAND_TIMEOUT, true, true);
        self.indexed_code_after(outcome)
    }

    /// Release a client (`AT+CMQTTREL`).
    pub fn release_client(&mut self, client: ClientIndex) -> ClientResult<()> {
        self.channel.send(&format!("AT+CMQTTREL={}", client))?;
        let outcome = self.channel.wait(&["+CMQTTREL: "], COMMAND_TIMEOUT, true, true);
        self.indexed_code_after(outcome)
    }

    /// Bind an SSL context to a session (`AT+CMQTTSSLCFG`).
    pub fn set_ssl_context(
        &mut self,
        session: SessionId,
        ctx: SslContextIndex,
    ) -> ClientResult<()> {
        let timeout = self.channel.config().default_timeout();
        self.channel
            .command(&format!("AT+CMQTTSSLCFG={},{}", session, ctx), timeout)?;
        Ok(())
    }

    pub fn set_will_topic(&mut self, client: ClientIndex, topic: &str) -> ClientResult<()> {
        self.upload(
            format!("AT+CMQTTWILLTOPIC={},{}", client, topic.len()),
            topic.as_bytes(),
            "+CMQTTWILLTOPIC: ",
        )
    }

    pub fn set_will_message(
        &mut self,
        client: ClientIndex,
        message: &str,
        qos: u8,
    ) -> ClientResult<()> {
        self.upload(
            format!("AT+CMQTTWILLMSG={},{},{}", client, message.len(), qos),
            message.as_bytes(),
            "+CMQTTWILLMSG: ",
        )
    }

    /// Connect to a broker (`AT+CMQTTCONNECT`).
    ///
    /// `server` gets a `tcp://` scheme unless it already has one.
    pub fn connect(
        &mut self,
        client: ClientIndex,
        server: &str,
        port: u16,
        params: &ConnectParams,
    ) -> ClientResult<()> {
        validate_text(server)?;
        let address = if server.contains("://") {
            format!("{}:{}", server, port)
        } else {
            format!("tcp://{}:{}", server, port)
        };
        let mut command = format!(
            "AT+CMQTTCONNECT={},\"{}\",{},{}",
            client,
            address,
            params.keepalive_secs,
            u8::from(params.clean_session)
        );
        if let Some((user, password)) = &params.credentials {
            validate_text(user)?;
            validate_text(password)?;
            command.push_str(&format!(",\"{}\",\"{}\"", user, password));
        }
        self.channel.send(&command)?;
        let timeout = Duration::from_secs(u64::from(params.keepalive_secs)) + RESPONSE_MARGIN;
        let outcome = self.channel.wait(&["+CMQTTCONNECT: "], timeout, false, true);
        self.indexed_code_after(outcome)
    }

    /// Whether `client` is connected, from `AT+CMQTTDISC?`.
    pub fn is_connected(&mut self, client: ClientIndex) -> ClientResult<bool> {
        self.channel.send("AT+CMQTTDISC?")?;
        let pattern = format!("+CMQTTDISC: {},", client);
        match self.channel.wait(&[pattern.as_str()], COMMAND_TIMEOUT, true, true) {
            MatchOutcome::MatchedPattern(_) => {
                let timeout = self.channel.config().default_timeout();
                let state = self.channel.parse_int_clear(timeout)?;
                Ok(state == 0)
            }
            MatchOutcome::Success | MatchOutcome::Failure => Ok(false),
            MatchOutcome::TimedOut => Err(AtError::TimedOut.into()),
        }
    }

    /// Disconnect, allowing the broker `timeout_secs` to acknowledge.
    pub fn disconnect(&mut self, client: ClientIndex, timeout_secs: u8) -> ClientResult<()> {
        self.channel
            .send(&format!("AT+CMQTTDISC={},{}", client, timeout_secs))?;
        let timeout = Duration::from_secs(u64::from(timeout_secs)) + RESPONSE_MARGIN;
        let outcome = self.channel.wait(&["+CMQTTDISC: "], timeout, false, true);
        self.indexed_code_after(outcome)
    }

    pub fn set_topic(&mut self, client: ClientIndex, topic: &str) -> ClientResult<()> {
        self.upload(
            format!("AT+CMQTTTOPIC={},{}", client, topic.len()),
            topic.as_bytes(),
            "+CMQTTTOPIC: ",
        )
    }

    pub fn set_payload(&mut self, client: ClientIndex, payload: &[u8]) -> ClientResult<()> {
        self.upload(
            format!("AT+CMQTTPAYLOAD={},{}", client, payload.len()),
            payload,
            "+CMQTTPAYLOAD: ",
        )
    }

    /// Publish the topic and payload set beforehand (`AT+CMQTTPUB`).
    pub fn publish(&mut self, client: ClientIndex, params: &PublishParams) -> ClientResult<()> {
        let command = format!(
            "AT+CMQTTPUB={},{},{},{},{}",
            client,
            params.qos,
            params.timeout_secs,
            u8::from(params.retained),
            u8::from(params.dup)
        );
        self.channel.send(&command)?;
        let timeout = Duration::from_secs(u64::from(params.timeout_secs)) + RESPONSE_MARGIN;
        let outcome = self.channel.wait(&["+CMQTTPUB: "], timeout, false, true);
        self.indexed_code_after(outcome)
    }

    /// Subscribe to one topic (`AT+CMQTTSUB`).
    pub fn subscribe(&mut self, client: ClientIndex, topic: &str, qos: u8) -> ClientResult<()> {
        if topic.is_empty() {
            return Err(ClientError::InvalidArgument("empty topic".to_string()));
        }
        let upload = Upload::new(
            format!("AT+CMQTTSUB={},{},{}", client, topic.len(), qos),
            topic.as_bytes(),
        )
        .inline_error("+CMQTTSUB: ")
        .confirm(Confirm::ResultCode("+CMQTTSUB: "))
        .confirm_timeout(COMMAND_TIMEOUT);
        self.channel.upload(&upload)?;
        Ok(())
    }

    fn upload(&mut self, command: String, data: &[u8], inline_error: &str) -> ClientResult<()> {
        if data.is_empty() {
            return Err(ClientError::InvalidArgument(format!(
                "empty data for {}",
                command
            )));
        }
        let upload = Upload::new(command, data).inline_error(inline_error);
        self.channel.upload(&upload)?;
        Ok(())
    }

    /// Map `+CMD: <code>` to a result.
    fn code_after(&mut self, outcome: MatchOutcome) -> ClientResult<()> {
        match outcome {
            MatchOutcome::MatchedPattern(_) => Ok(self.channel.code_line()?),
            other => Ok(other.expect_success()?),
        }
    }

    /// Map `+CMD: <client>,<code>` to a result.
    fn indexed_code_after(&mut self, outcome: MatchOutcome) -> ClientResult<()> {
        match outcome {
            MatchOutcome::MatchedPattern(_) => Ok(self.channel.indexed_code_line()?),
            other => Ok(other.expect_success()?),
        }
    }
}

fn validate_text(value: &str) -> ClientResult<()> {
    if value.contains(['"', '\r', '\n']) {
        return Err(ClientError::InvalidArgument(format!(
            "{:?} cannot be quoted in a command",
            value
        )));
    }
    Ok(())
}

/// Parameters of `AT+CMQTTCONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub keepalive_secs: u16,
    pub clean_session: bool,
    /// Username and password.
    pub credentials: Option<(String, String)>,
}

impl Default for ConnectParams {
    fn default() -> Self {
        ConnectParams {
            keepalive_secs: 60,
            clean_session: true,
            credentials: None,
        }
    }
}

/// Parameters of `AT+CMQTTPUB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishParams {
    pub qos: u8,
    /// Time the broker has to acknowledge, 1 to 180 seconds.
    pub timeout_secs: u8,
    pub retained: bool,
    pub dup: bool,
}

impl Default for PublishParams {
    fn default() -> Self {
        PublishParams {
            qos: 0,
            timeout_secs: 60,
            retained: false,
            dup: false,
        }
    }
}

/// Last will registered before connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: String,
    pub qos: u8,
}

/// Session handles and inbox sizing for an [`MqttClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttOptions {
    pub client_index: ClientIndex,
    pub session_id: SessionId,
    pub inbox_capacity: usize,
    /// Messages arriving while the inbox is full are dropped by default.
    pub inbox_policy: OverflowPolicy,
}

impl Default for MqttOptions {
    fn default() -> Self {
        MqttOptions {
            client_index: ClientIndex(0),
            session_id: SessionId(0),
            inbox_capacity: 8,
            inbox_policy: OverflowPolicy::DropNewest,
        }
    }
}

/// MQTT client façade.
///
/// Registers the MQTT URC handlers on creation and removes them when dropped.
pub struct MqttClient<'a> {
    channel: &'a mut dyn AtChannel,
    client_id: String,
    use_ssl: bool,
    options: MqttOptions,
    secure: SecureContext,
    inbox: SharedQueue<MqttMessage>,
    handlers: Vec<HandlerId>,
}

impl<'a> MqttClient<'a> {
    pub fn new(
        channel: &'a mut dyn AtChannel,
        client_id: impl Into<String>,
        use_ssl: bool,
    ) -> ClientResult<Self> {
        Self::with_options(
            channel,
            client_id,
            use_ssl,
            MqttOptions::default(),
            SslContextIndex(0),
        )
    }

    pub fn with_options(
        channel: &'a mut dyn AtChannel,
        client_id: impl Into<String>,
        use_ssl: bool,
        options: MqttOptions,
        ssl_context: SslContextIndex,
    ) -> ClientResult<Self> {
        let inbox = shared_queue(options.inbox_capacity, options.inbox_policy);
        let mut client = MqttClient {
            channel,
            client_id: client_id.into(),
            use_ssl,
            options,
            secure: SecureContext::new(ssl_context),
            inbox,
            handlers: Vec::new(),
        };
        let handlers: [Box<dyn UrcHandler>; 3] = [
            Box::new(MqttRxHandler::new(client.inbox.clone())),
            Box::new(NotificationHandler::new(
                URC_CONNECTION_LOST,
                UrcEvent::MqttConnectionLost,
            )),
            Box::new(NotificationHandler::new(URC_NO_NET, UrcEvent::MqttNoNet)),
        ];
        for handler in handlers {
            let id = client.channel.register(handler)?;
            client.handlers.push(id);
        }
        Ok(client)
    }

    fn commands(&mut self) -> MqttCommands<'_> {
        MqttCommands::new(&mut *self.channel)
    }

    /// Start the service and acquire the client.
    pub fn begin(&mut self) -> ClientResult<()> {
        match self.commands().start() {
            Ok(()) => {}
            Err(ClientError::MqttAlreadyStarted) => debug!("MQTT service already running"),
            Err(e) => return Err(e),
        }
        let (client, use_ssl) = (self.options.client_index, self.use_ssl);
        let client_id = self.client_id.clone();
        self.commands().acquire_client(client, &client_id, use_ssl)?;
        if use_ssl {
            let (session, ctx) = (self.options.session_id, self.secure.index());
            self.commands().set_ssl_context(session, ctx)?;
        }
        Ok(())
    }

    /// Connect, registering `will` first when given.
    pub fn connect(
        &mut self,
        server: &str,
        port: u16,
        params: &ConnectParams,
        will: Option<&Will>,
    ) -> ClientResult<()> {
        let client = self.options.client_index;
        if let Some(will) = will {
            self.commands().set_will_topic(client, &will.topic)?;
            self.commands()
                .set_will_message(client, &will.message, will.qos)?;
        }
        self.commands().connect(client, server, port, params)?;
        info!("MQTT client {} connected to {}:{}", client, server, port);
        Ok(())
    }

    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        params: &PublishParams,
    ) -> ClientResult<()> {
        let client = self.options.client_index;
        self.commands().set_topic(client, topic)?;
        self.commands().set_payload(client, payload)?;
        self.commands().publish(client, params)
    }

    pub fn subscribe(&mut self, topic: &str, qos: u8) -> ClientResult<()> {
        let client = self.options.client_index;
        self.commands().subscribe(client, topic, qos)
    }

    pub fn is_connected(&mut self) -> ClientResult<bool> {
        let client = self.options.client_index;
        self.commands().is_connected(client)
    }

    pub fn disconnect(&mut self, timeout_secs: u8) -> ClientResult<()> {
        let client = self.options.client_index;
        self.commands().disconnect(client, timeout_secs)
    }

    /// Release the client and stop the service.
    pub fn end(&mut self) -> ClientResult<()> {
        let client = self.options.client_index;
        self.commands().release_client(client)?;
        match self.commands().stop() {
            Err(ClientError::MqttAlreadyStopped) => Ok(()),
            other => other,
        }
    }

    /// Dispatch URCs for up to `timeout`.
    pub fn poll(&mut self, timeout: Duration) {
        self.channel.listen(timeout);
    }

    pub fn message_available(&self) -> usize {
        self.inbox.lock().len()
    }

    pub fn pop_message(&mut self) -> Option<MqttMessage> {
        self.inbox.lock().pop()
    }

    /// SSL context used when `use_ssl` is set.
    pub fn secure_context(&mut self) -> &mut SecureContext {
        &mut self.secure
    }

    /// Borrow the channel together with the SSL context, for provisioning.
    pub fn secure_parts(&mut self) -> (&mut SecureContext, &mut dyn AtChannel) {
        (&mut self.secure, &mut *self.channel)
    }

    pub fn channel(&mut self) -> &mut dyn AtChannel {
        &mut *self.channel
    }
}

impl Drop for MqttClient<'_> {
    fn drop(&mut self) {
        for id in self.handlers.drain(..) {
            self.channel.deregister(id);
        }
    }
}
