//! Subcommand implementations.
//!
//! Each runs against any [`AtChannel`] and writes user-facing output to a
//! caller-supplied writer, so they can be exercised without a modem.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use a76xx_at::{AtChannel, RESPONSE_ERROR, RESPONSE_OK};
use a76xx_client::gnss::GnssStream;
use a76xx_client::mqtt::{ConnectParams, PublishParams};
use a76xx_client::{AuthMode, ClientSlots, MqttClient, SecureContext, SslContextIndex};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, MqttConfig, SslConfig};
use crate::error::{CliError, CliResult};

/// Granularity of the listen loop.
const LISTEN_SLICE: Duration = Duration::from_millis(100);

/// Time the broker gets to acknowledge a disconnect.
const DISCONNECT_TIMEOUT_SECS: u8 = 10;

// ============================================================================
// at
// ============================================================================

/// How `at` reports the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Echo {
    #[default]
    Text,
    Hex,
}

/// Send one command and echo everything up to the final `OK` or `ERROR`.
///
/// This is a raw passthrough: bytes are read straight off the stream
/// without going through the matcher, so URCs that arrive meanwhile are
/// echoed as part of the response and never reach registered handlers.
/// Returns whether the modem answered `OK`.
pub fn run_at(
    channel: &mut dyn AtChannel,
    command: &str,
    timeout: Duration,
    echo: Echo,
    out: &mut dyn Write,
) -> CliResult<bool> {
    channel.send(command)?;
    let deadline = Instant::now() + timeout;
    let mut response = Vec::new();
    let mut stream = channel.stream();
    let ok = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(byte) = stream.read_byte_timeout(remaining) else {
            return Err(a76xx_at::AtError::TimedOut.into());
        };
        response.push(byte);
        if response.ends_with(RESPONSE_OK.as_bytes()) {
            break true;
        }
        if response.ends_with(RESPONSE_ERROR.as_bytes()) {
            break false;
        }
    };
    match echo {
        Echo::Text => out.write_all(&response)?,
        Echo::Hex => writeln!(out, "{}", hex::encode(&response))?,
    }
    Ok(ok)
}

// ============================================================================
// provision
// ============================================================================

fn read_file(path: &Path) -> CliResult<Vec<u8>> {
    fs::read(path).map_err(|source| CliError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the configured certificates into their slots and bind them.
pub fn run_provision(channel: &mut dyn AtChannel, ssl: &SslConfig) -> CliResult<AuthMode> {
    if ssl.ca.is_none() && ssl.client.is_none() {
        return Err(CliError::Usage(
            "no certificates configured under ssl.ca or ssl.client".to_string(),
        ));
    }
    let mut ctx = SecureContext::new(SslContextIndex(ssl.context));
    ctx.config_ssl(channel, &ssl.settings)?;

    if let Some(ca) = &ssl.ca {
        let data = read_file(&ca.path)?;
        info!("Writing {} ({} bytes) to {:?}", ca.path.display(), data.len(), ca.slot);
        ctx.write_ca_cert(channel, &data, &ca.slot)?;
    }
    if let Some(files) = &ssl.client {
        let cert = read_file(&files.cert.path)?;
        let key = read_file(&files.key.path)?;
        let password = read_file(&files.password.path)?;
        let slots = ClientSlots {
            cert: files.cert.slot.clone(),
            key: files.key.slot.clone(),
            password: files.password.slot.clone(),
        };
        info!("Writing client credentials to {:?}", slots);
        ctx.write_client_cert_and_key(channel, &cert, &key, &password, &slots)?;
    }
    Ok(ctx.auth_mode())
}

// ============================================================================
// listen
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenOptions {
    pub duration: Duration,
    /// Enable the NMEA stream while listening.
    pub gnss: bool,
}

/// What a listen run produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenSummary {
    pub mqtt_messages: usize,
    pub nmea_sentences: usize,
    pub events: usize,
}

/// Dispatch URCs for the configured duration, printing decoded MQTT messages
/// and NMEA sentences. Subscribes first when `mqtt.subscribe` is non-empty.
pub fn run_listen(
    channel: &mut dyn AtChannel,
    config: &AppConfig,
    options: &ListenOptions,
    running: &AtomicBool,
    out: &mut dyn Write,
) -> CliResult<ListenSummary> {
    let mut gnss = GnssStream::new();
    if options.gnss {
        gnss.enable(channel)?;
    }
    let deadline = Instant::now() + options.duration;
    let mut summary = ListenSummary::default();

    let result = if config.mqtt.subscribe.is_empty() {
        let mut result = Ok(());
        while running.load(Ordering::SeqCst) && Instant::now() < deadline {
            if let Err(e) = pump(channel, &mut gnss, &mut summary, out) {
                result = Err(e);
                break;
            }
        }
        result
    } else {
        listen_mqtt(channel, config, deadline, running, &mut gnss, &mut summary, out)
    };

    if options.gnss {
        gnss.disable(channel, true)?;
    }
    result.map(|()| summary)
}

fn listen_mqtt(
    channel: &mut dyn AtChannel,
    config: &AppConfig,
    deadline: Instant,
    running: &AtomicBool,
    gnss: &mut GnssStream,
    summary: &mut ListenSummary,
    out: &mut dyn Write,
) -> CliResult<()> {
    let mut client = open_mqtt(channel, config)?;
    for topic in &config.mqtt.subscribe {
        client.subscribe(topic, 1)?;
        info!("Subscribed to {}", topic);
    }

    let mut result = Ok(());
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        let pumped = pump(client.channel(), gnss, summary, out);
        let printed = drain_messages(&mut client, summary, out);
        if let Err(e) = pumped.and(printed) {
            result = Err(e);
            break;
        }
    }
    close_mqtt(&mut client);
    result
}

/// One listen slice: dispatch, print sentences, log events.
fn pump(
    channel: &mut dyn AtChannel,
    gnss: &mut GnssStream,
    summary: &mut ListenSummary,
    out: &mut dyn Write,
) -> CliResult<()> {
    channel.listen(LISTEN_SLICE);
    while let Some(event) = channel.pop_urc() {
        debug!("URC {:?}", event);
        summary.events += 1;
    }
    while let Some(sentence) = gnss.pop() {
        writeln!(out, "{}", sentence)?;
        summary.nmea_sentences += 1;
    }
    Ok(())
}

fn drain_messages(
    client: &mut MqttClient<'_>,
    summary: &mut ListenSummary,
    out: &mut dyn Write,
) -> CliResult<()> {
    while let Some(message) = client.pop_message() {
        if message.frame.is_truncated() {
            warn!("Message on {} was truncated", message.topic());
        }
        writeln!(
            out,
            "{} {}",
            message.topic(),
            String::from_utf8_lossy(message.payload())
        )?;
        summary.mqtt_messages += 1;
    }
    Ok(())
}

// ============================================================================
// publish
// ============================================================================

/// Connect, publish one message and disconnect.
pub fn run_publish(
    channel: &mut dyn AtChannel,
    config: &AppConfig,
    topic: &str,
    message: &[u8],
    qos: u8,
) -> CliResult<()> {
    let mut client = open_mqtt(channel, config)?;
    let params = PublishParams {
        qos,
        ..PublishParams::default()
    };
    let result = client.publish(topic, message, &params);
    close_mqtt(&mut client);
    result?;
    info!("Published {} bytes to {}", message.len(), topic);
    Ok(())
}

fn connect_params(mqtt: &MqttConfig) -> ConnectParams {
    ConnectParams {
        keepalive_secs: mqtt.keepalive_secs,
        clean_session: mqtt.clean_session,
        credentials: mqtt.username.clone().zip(mqtt.password.clone()),
    }
}

fn open_mqtt<'a>(channel: &'a mut dyn AtChannel, config: &AppConfig) -> CliResult<MqttClient<'a>> {
    let mqtt = &config.mqtt;
    let mut client = MqttClient::with_options(
        channel,
        mqtt.client_id.clone(),
        mqtt.use_ssl,
        mqtt.options.clone(),
        SslContextIndex(config.ssl.context),
    )?;
    client.begin()?;
    client.connect(&mqtt.server, mqtt.port, &connect_params(mqtt), None)?;
    Ok(client)
}

/// Best-effort teardown; failures are logged.
fn close_mqtt(client: &mut MqttClient<'_>) {
    if let Err(e) = client.disconnect(DISCONNECT_TIMEOUT_SECS) {
        warn!("MQTT disconnect failed: {}", e);
    }
    if let Err(e) = client.end() {
        warn!("MQTT shutdown failed: {}", e);
    }
}
