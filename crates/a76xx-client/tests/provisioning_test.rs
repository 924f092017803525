//! Certificate provisioning against a simulated certificate store.
//!
//! [`CertStore`] behaves like the modem's flash store: it lists, deletes and
//! accepts uploads through the prompt handshake, and can be told to reject the
//! next upload to model a failure between delete and download.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use a76xx_at::{EngineConfig, ModemSerial, Transport};
use a76xx_client::ssl::SslCommands;
use a76xx_client::{AuthMode, ClientError, ClientSlots, SecureContext, SslContextIndex};
use parking_lot::Mutex;

// ============================================================================
// Simulated device
// ============================================================================

#[derive(Default)]
struct StoreState {
    slots: BTreeMap<String, Vec<u8>>,
    /// Reject the next upload after its bytes arrive.
    fail_next_upload: bool,
    /// Upload in progress: slot name, expected length, bytes so far.
    receiving: Option<(String, usize, Vec<u8>)>,
    line: Vec<u8>,
    output: Vec<u8>,
    commands: Vec<String>,
}

#[derive(Clone, Default)]
struct CertStore {
    state: Arc<Mutex<StoreState>>,
}

impl CertStore {
    fn with_slot(name: &str, data: &[u8]) -> Self {
        let store = CertStore::default();
        store
            .state
            .lock()
            .slots
            .insert(name.to_string(), data.to_vec());
        store
    }

    fn fail_next_upload(&self) {
        self.state.lock().fail_next_upload = true;
    }

    fn slots(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.lock().slots.clone()
    }

    fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

impl StoreState {
    fn reply(&mut self, text: &str) {
        self.output.extend_from_slice(text.as_bytes());
    }

    fn receive(&mut self, byte: u8) {
        let Some((name, len, mut buf)) = self.receiving.take() else {
            return;
        };
        buf.push(byte);
        if buf.len() < len {
            self.receiving = Some((name, len, buf));
        } else if std::mem::take(&mut self.fail_next_upload) {
            self.reply("\r\nERROR\r\n");
        } else {
            self.slots.insert(name, buf);
            self.reply("\r\nOK\r\n");
        }
    }

    fn execute(&mut self, line: &str) {
        self.commands.push(line.to_string());
        if line == "AT+CCERTLIST" {
            let listing: String = self
                .slots
                .keys()
                .map(|name| format!("\r\n+CCERTLIST: \"{}\"", name))
                .collect();
            self.reply(&format!("{}\r\n\r\nOK\r\n", listing));
        } else if let Some(arg) = line.strip_prefix("AT+CCERTDELE=") {
            if self.slots.remove(&unquote(arg)).is_some() {
                self.reply("\r\nOK\r\n");
            } else {
                self.reply("\r\nERROR\r\n");
            }
        } else if let Some(args) = line.strip_prefix("AT+CCERTDOWN=") {
            let (name, len) = args.split_once(',').unwrap_or((args, "0"));
            let name = unquote(name);
            match len.parse::<usize>() {
                Ok(len) if !self.slots.contains_key(&name) && len > 0 => {
                    self.receiving = Some((name, len, Vec::new()));
                    self.reply("\r\n>");
                }
                _ => self.reply("\r\nERROR\r\n"),
            }
        } else {
            self.reply("\r\nOK\r\n");
        }
    }
}

impl Transport for CertStore {
    fn available(&mut self) -> usize {
        self.state.lock().output.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut state = self.state.lock();
        if state.output.is_empty() {
            None
        } else {
            Some(state.output.remove(0))
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        for &byte in data {
            if state.receiving.is_some() {
                state.receive(byte);
                continue;
            }
            state.line.push(byte);
            if state.line.ends_with(b"\r\n") {
                let len = state.line.len() - 2;
                let line = String::from_utf8_lossy(&state.line[..len]).to_string();
                state.line.clear();
                state.execute(&line);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn modem(store: &CertStore) -> ModemSerial<CertStore> {
    let config = EngineConfig {
        poll_interval_ms: 0,
        byte_timeout_ms: 20,
        default_timeout_ms: 200,
        ..EngineConfig::default()
    };
    ModemSerial::with_config(store.clone(), config)
}

// ============================================================================
// Overwrite
// ============================================================================

#[test]
fn test_overwrite_replaces_existing_slot() {
    let store = CertStore::with_slot("ca.pem", b"old");
    let mut modem = modem(&store);

    SslCommands::new(&mut modem)
        .cert_overwrite(b"new-ca", "ca.pem")
        .unwrap();

    let slots = store.slots();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots["ca.pem"], b"new-ca");
    assert_eq!(
        store.commands(),
        vec![
            "AT+CCERTLIST",
            "AT+CCERTDELE=\"ca.pem\"",
            "AT+CCERTDOWN=\"ca.pem\",6",
        ]
    );
}

#[test]
fn test_overwrite_converges_after_failed_upload() {
    let store = CertStore::with_slot("ca.pem", b"old");
    store.fail_next_upload();
    let mut modem = modem(&store);

    let err = SslCommands::new(&mut modem)
        .cert_overwrite(b"new-ca", "ca.pem")
        .unwrap_err();
    assert!(matches!(err, ClientError::At(_)));
    // The delete went through, the upload did not.
    assert!(store.slots().is_empty());

    SslCommands::new(&mut modem)
        .cert_overwrite(b"new-ca", "ca.pem")
        .unwrap();
    let slots = store.slots();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots["ca.pem"], b"new-ca");
}

#[test]
fn test_download_into_taken_slot_fails() {
    let store = CertStore::with_slot("ca.pem", b"old");
    let mut modem = modem(&store);

    let err = SslCommands::new(&mut modem)
        .cert_download(b"new", "ca.pem")
        .unwrap_err();
    assert!(matches!(err, ClientError::At(_)));
    assert_eq!(store.slots()["ca.pem"], b"old");
}

#[test]
fn test_similar_slot_names_are_distinct() {
    let store = CertStore::with_slot("ca.pem.bak", b"backup");
    let mut modem = modem(&store);

    SslCommands::new(&mut modem)
        .cert_overwrite(b"ca", "ca.pem")
        .unwrap();
    let slots = store.slots();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots["ca.pem.bak"], b"backup");
    assert_eq!(slots["ca.pem"], b"ca");
}

// ============================================================================
// Secure context
// ============================================================================

#[test]
fn test_mutual_provisioning() {
    let store = CertStore::default();
    let mut modem = modem(&store);
    let mut ctx = SecureContext::new(SslContextIndex(1));
    let slots = ClientSlots {
        cert: "client.pem".into(),
        key: "client.key".into(),
        password: "client.pwd".into(),
    };

    ctx.write_ca_cert(&mut modem, b"CA", "ca.pem").unwrap();
    assert_eq!(ctx.auth_mode(), AuthMode::ServerOnly);
    ctx.write_client_cert_and_key(&mut modem, b"CERT", b"KEY", b"PWD", &slots)
        .unwrap();
    assert_eq!(ctx.auth_mode(), AuthMode::Mutual);

    let stored = store.slots();
    assert_eq!(stored.len(), 4);
    assert_eq!(stored["client.key"], b"KEY");
    assert_eq!(
        store.commands().last().map(String::as_str),
        Some("AT+CSSLCFG=\"authmode\",1,2")
    );
}
