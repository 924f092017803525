//! Subcommands run against a scripted modem.

use std::io::Write as _;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use a76xx_at::mock::MockTransport;
use a76xx_at::{EngineConfig, ModemSerial};
use a76xx_cli::commands::{run_at, run_listen, run_provision, run_publish, Echo, ListenOptions};
use a76xx_cli::config::{CertFile, SslConfig};
use a76xx_cli::{AppConfig, CliError};
use a76xx_client::AuthMode;

fn modem() -> (ModemSerial<MockTransport>, MockTransport) {
    let mock = MockTransport::new();
    let config = EngineConfig {
        poll_interval_ms: 0,
        byte_timeout_ms: 20,
        default_timeout_ms: 200,
        ..EngineConfig::default()
    };
    (ModemSerial::with_config(mock.clone(), config), mock)
}

#[test]
fn test_at_echoes_response() {
    let (mut modem, mock) = modem();
    mock.set_responder(|line| {
        assert_eq!(line, "AT+CSQ");
        b"\r\n+CSQ: 21,99\r\n\r\nOK\r\n".to_vec()
    });
    let mut out = Vec::new();
    let ok = run_at(
        &mut modem,
        "AT+CSQ",
        Duration::from_millis(200),
        Echo::Text,
        &mut out,
    )
    .unwrap();
    assert!(ok);
    assert_eq!(out, b"\r\n+CSQ: 21,99\r\n\r\nOK\r\n");
}

#[test]
fn test_at_echoes_interleaved_urc() {
    let (mut modem, mock) = modem();
    mock.set_responder(|_| b"\r\n+CMQTTCONNLOST: 0,1\r\n\r\nOK\r\n".to_vec());
    let mut out = Vec::new();
    let ok = run_at(&mut modem, "AT", Duration::from_millis(200), Echo::Text, &mut out).unwrap();
    assert!(ok);
    assert_eq!(out, b"\r\n+CMQTTCONNLOST: 0,1\r\n\r\nOK\r\n");
    assert_eq!(modem.urc_pending(), 0);
}

#[test]
fn test_at_reports_error_as_hex() {
    let (mut modem, mock) = modem();
    mock.set_responder(|_| b"ERROR\r\n".to_vec());
    let mut out = Vec::new();
    let ok = run_at(&mut modem, "AT+X", Duration::from_millis(200), Echo::Hex, &mut out).unwrap();
    assert!(!ok);
    assert_eq!(String::from_utf8(out).unwrap(), "4552524f520d0a\n");
}

#[test]
fn test_at_times_out() {
    let (mut modem, _) = modem();
    let mut out = Vec::new();
    let err =
        run_at(&mut modem, "AT", Duration::from_millis(20), Echo::Text, &mut out).unwrap_err();
    assert!(matches!(err, CliError::At(_)));
}

#[test]
fn test_provision_requires_certificates() {
    let (mut modem, _) = modem();
    let err = run_provision(&mut modem, &SslConfig::default()).unwrap_err();
    assert!(matches!(err, CliError::Usage(_)));
}

#[test]
fn test_provision_ca_only() {
    let dir = std::env::temp_dir().join(format!("a76xx-cli-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("ca.pem");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(b"-----BEGIN CERTIFICATE-----")
        .unwrap();

    let (mut modem, mock) = modem();
    mock.set_responder(|line| {
        if line == "AT+CCERTLIST" {
            b"\r\nOK\r\n".to_vec()
        } else if line.starts_with("AT+CCERTDOWN=") {
            b"\r\n>\r\nOK\r\n".to_vec()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    });
    let ssl = SslConfig {
        context: 1,
        ca: Some(CertFile {
            path: path.clone(),
            slot: "ca.pem".into(),
        }),
        ..SslConfig::default()
    };
    assert_eq!(run_provision(&mut modem, &ssl).unwrap(), AuthMode::ServerOnly);
    let written = mock.written_string();
    assert!(written.contains("AT+CCERTDOWN=\"ca.pem\",27\r\n-----BEGIN CERTIFICATE-----"));
    assert!(written.contains("AT+CSSLCFG=\"authmode\",1,1\r\n"));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_listen_prints_nmea() {
    let (mut modem, mock) = modem();
    // Sentences start flowing once NMEA output is switched on.
    mock.set_responder(|line| {
        if line == "AT+CGNSSTST=1" {
            b"\r\nOK\r\n$GNRMC,083559.00,A\r\n$GPGSV,1,1,00\r\n".to_vec()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    });
    let options = ListenOptions {
        duration: Duration::from_millis(150),
        gnss: true,
    };
    let running = AtomicBool::new(true);
    let mut out = Vec::new();
    let config = AppConfig::default();
    let summary = run_listen(&mut modem, &config, &options, &running, &mut out).unwrap();
    assert_eq!(summary.nmea_sentences, 2);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "$GNRMC,083559.00,A\n$GPGSV,1,1,00\n"
    );
    assert!(modem.registry().is_empty());
}

#[test]
fn test_listen_stops_when_interrupted() {
    let (mut modem, _) = modem();
    let options = ListenOptions {
        duration: Duration::from_secs(30),
        gnss: false,
    };
    let running = AtomicBool::new(false);
    let mut out = Vec::new();
    let summary =
        run_listen(&mut modem, &AppConfig::default(), &options, &running, &mut out).unwrap();
    assert_eq!(summary, Default::default());
}

#[test]
fn test_publish_sequence() {
    let (mut modem, mock) = modem();
    mock.set_responder(|line| {
        let reply = if line.contains("AT+CMQTTSTART") {
            "\r\nOK\r\n\r\n+CMQTTSTART: 0\r\n"
        } else if line.contains("AT+CMQTTSTOP") {
            "\r\nOK\r\n\r\n+CMQTTSTOP: 0\r\n"
        } else if line.contains("AT+CMQTTCONNECT=") {
            "\r\nOK\r\n\r\n+CMQTTCONNECT: 0,0\r\n"
        } else if line.contains("AT+CMQTTTOPIC=") || line.contains("AT+CMQTTPAYLOAD=") {
            "\r\n>\r\nOK\r\n"
        } else if line.contains("AT+CMQTTPUB=") {
            "\r\nOK\r\n\r\n+CMQTTPUB: 0,0\r\n"
        } else if line.contains("AT+CMQTTDISC=") {
            "\r\nOK\r\n\r\n+CMQTTDISC: 0,0\r\n"
        } else {
            "\r\nOK\r\n"
        };
        reply.as_bytes().to_vec()
    });
    let config = AppConfig::default();
    run_publish(&mut modem, &config, "a76xx/test", b"hello", 1).unwrap();

    let written = mock.written_string();
    assert!(written.contains("AT+CMQTTCONNECT=0,\"tcp://test.mosquitto.org:1883\",60,1\r\n"));
    assert!(written.contains("AT+CMQTTTOPIC=0,10\r\na76xx/test"));
    assert!(written.contains("AT+CMQTTPAYLOAD=0,5\r\nhello"));
    assert!(written.contains("AT+CMQTTPUB=0,1,60,0,0\r\n"));
    assert!(written.ends_with("AT+CMQTTREL=0\r\nAT+CMQTTSTOP\r\n"));
}
