//! YAML configuration for the CLI.
//!
//! Every section is optional. A minimal file only names the bridge:
//!
//! ```yaml
//! address: 192.168.4.1:3000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use a76xx_at::EngineConfig;
use a76xx_client::{MqttOptions, SslSettings};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `host:port` of the serial bridge.
    pub address: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    pub engine: EngineConfig,
    pub ssl: SslConfig,
    pub mqtt: MqttConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            address: "127.0.0.1:3000".to_string(),
            connect_timeout_ms: 5000,
            engine: EngineConfig::default(),
            ssl: SslConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| CliError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> CliResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// A certificate file and the store slot it is written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertFile {
    pub path: PathBuf,
    pub slot: String,
}

/// Client certificate, key and key password files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCertFiles {
    pub cert: CertFile,
    pub key: CertFile,
    pub password: CertFile,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    /// SSL context index, 0 to 9.
    pub context: u8,
    pub settings: SslSettings,
    pub ca: Option<CertFile>,
    pub client: Option<ClientCertFiles>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub server: String,
    pub port: u16,
    pub client_id: String,
    pub use_ssl: bool,
    pub keepalive_secs: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topics subscribed to by `listen`.
    pub subscribe: Vec<String>,
    #[serde(flatten)]
    pub options: MqttOptions,
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            server: "test.mosquitto.org".to_string(),
            port: 1883,
            client_id: "a76xx".to_string(),
            use_ssl: false,
            keepalive_secs: 60,
            clean_session: true,
            username: None,
            password: None,
            subscribe: Vec::new(),
            options: MqttOptions::default(),
        }
    }
}
