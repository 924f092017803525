//! `a76xx` binary entry point.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use a76xx_at::ModemSerial;
use a76xx_cli::commands::{self, Echo, ListenOptions};
use a76xx_cli::{AppConfig, CliResult, TcpTransport};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "a76xx")]
#[command(about = "Talk to a SIMCom A76XX modem over a TCP serial bridge")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bridge address, overriding the configuration
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Log every byte exchanged with the modem
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one AT command and print the response
    At {
        /// Command line without the trailing CRLF, e.g. `AT+CSQ`
        command: String,

        /// Response timeout in milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout: u64,

        /// Print the response as hex
        #[arg(long)]
        hex: bool,
    },

    /// Write the configured certificates and bind them to the SSL context
    Provision,

    /// Print MQTT messages and NMEA sentences as they arrive
    Listen {
        /// How long to listen
        #[arg(short, long, default_value = "60")]
        seconds: u64,

        /// Also enable the GNSS NMEA stream
        #[arg(long)]
        gnss: bool,
    },

    /// Publish one MQTT message
    Publish {
        #[arg(short, long)]
        topic: String,

        #[arg(short, long)]
        message: String,

        #[arg(short, long, default_value = "0")]
        qos: u8,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> CliResult<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(address) = cli.address {
        config.address = address;
    }

    let transport = TcpTransport::connect(
        &config.address,
        Duration::from_millis(config.connect_timeout_ms),
    )?;
    info!("Connected to {}", config.address);
    let mut modem = ModemSerial::with_config(transport, config.engine.clone());
    let mut stdout = io::stdout();

    match cli.command {
        Command::At {
            command,
            timeout,
            hex,
        } => {
            let echo = if hex { Echo::Hex } else { Echo::Text };
            let ok = commands::run_at(
                &mut modem,
                &command,
                Duration::from_millis(timeout),
                echo,
                &mut stdout,
            )?;
            if !ok {
                error!("{} answered ERROR", command);
            }
        }
        Command::Provision => {
            let mode = commands::run_provision(&mut modem, &config.ssl)?;
            info!("SSL context {} provisioned, auth mode {:?}", config.ssl.context, mode);
        }
        Command::Listen { seconds, gnss } => {
            let running = Arc::new(AtomicBool::new(true));
            let r = running.clone();
            ctrlc::set_handler(move || {
                r.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                a76xx_cli::CliError::Usage(format!("cannot install Ctrl-C handler: {}", e))
            })?;

            let options = ListenOptions {
                duration: Duration::from_secs(seconds),
                gnss,
            };
            let summary =
                commands::run_listen(&mut modem, &config, &options, &running, &mut stdout)?;
            info!(
                "Received {} MQTT messages, {} NMEA sentences, {} events",
                summary.mqtt_messages, summary.nmea_sentences, summary.events
            );
        }
        Command::Publish {
            topic,
            message,
            qos,
        } => {
            commands::run_publish(&mut modem, &config, &topic, message.as_bytes(), qos)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
