//! Feed bridge - Main Entry Point
//!
//! `run` drains newline-delimited JSON messages from stdin into broker feeds
//! until a `SHUTDOWN` message, end of input or a termination signal.

use bytes::Bytes;
use clap::{Parser, Subcommand};
use feedbridge::bridge::{channel_queue, QueueDrainWorker, RunOutcome};
use feedbridge::config::{BridgeConfig, UndeliverablePolicy};
use feedbridge::error::BridgeError;
use feedbridge::observability::{init_default_logging, metrics, HealthServer};
use feedbridge::prediction::{AzureFaceConfig, AzureFacePredictor, ImagePredictor};
use feedbridge::protocol::Message;
use feedbridge::transport::MqttLink;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Capacity of the in-process inbound queue
const INBOUND_CAPACITY: usize = 1024;

/// Capacity of the dead letter channel drained to stdout
const DEAD_LETTER_CAPACITY: usize = 256;

/// Exit code when the framework version gate refuses to run
const EXIT_INCOMPATIBLE: i32 = 2;

/// Queue to MQTT feed bridge
#[derive(Parser)]
#[command(name = "feedbridge")]
#[command(about = "Republishes sensor pipeline messages onto MQTT feeds")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "FEEDBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge worker, reading messages from stdin
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
    /// Run the configured image predictor on a file and print the extended data
    Predict {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose > 0);

    info!("Starting feedbridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Predict { image } => run_prediction(&config, &image).await,
    };

    match result {
        Ok(code) if code != 0 => process::exit(code),
        Ok(_) => info!("Application shutdown complete"),
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

fn load_configuration(config_path: Option<&Path>) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(BridgeConfig::load_from_file(path)?);
    }

    for path_str in ["feedbridge.toml", "config/feedbridge.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(BridgeConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass one with -c/--config or create feedbridge.toml".into())
}

async fn run_bridge(config: BridgeConfig) -> Result<i32, Box<dyn std::error::Error>> {
    metrics().set_worker_state("initializing");

    let link = MqttLink::new(&config.mqtt, config.get_mqtt_key())?;
    let (sender, queue) = channel_queue(INBOUND_CAPACITY);

    spawn_stdin_reader(sender.clone());
    spawn_signal_handler(sender)?;

    let health = config.health.as_ref().map(|section| {
        let server = Arc::new(HealthServer::new(config.mqtt.username.clone(), section.port));
        let task_server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = task_server.start().await {
                error!("Health server error: {}", e);
            }
        });
        server
    });

    let dead_letter = (config.publish.on_disconnected == UndeliverablePolicy::DeadLetter)
        .then(spawn_dead_letter_writer);

    let mut worker = QueueDrainWorker::new(config, link, queue);
    if let Some(health) = health {
        worker = worker.with_health(health);
    }
    if let Some(dead_letter) = dead_letter {
        worker = worker.with_dead_letter(Box::new(dead_letter));
    }

    match worker.run().await? {
        RunOutcome::Incompatible { current, minimum } => {
            error!("Not running: {}", BridgeError::VersionIncompatible { current, minimum });
            Ok(EXIT_INCOMPATIBLE)
        }
        RunOutcome::Completed(stats) => {
            info!(
                received = stats.received,
                published = stats.published,
                dropped = stats.dropped,
                "Bridge finished"
            );
            Ok(0)
        }
    }
}

/// Forward stdin lines to the inbound queue; end of input enqueues the sentinel
fn spawn_stdin_reader(sender: mpsc::Sender<Message>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match Message::from_json(line) {
                        Ok(message) => {
                            if sender.send(message).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Skipping malformed message: {}", e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        info!("Input closed, requesting shutdown");
        let _ = sender.send(Message::shutdown()).await;
    });
}

fn spawn_signal_handler(sender: mpsc::Sender<Message>) -> Result<(), std::io::Error> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        let _ = sender.send(Message::shutdown()).await;
    });

    Ok(())
}

/// Dead-lettered messages are written to stdout as JSON lines
fn spawn_dead_letter_writer() -> mpsc::Sender<Message> {
    let (sender, mut receiver) = mpsc::channel::<Message>(DEAD_LETTER_CAPACITY);
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = receiver.recv().await {
            match message.stringify() {
                Ok(line) => {
                    let written = async {
                        stdout.write_all(&line).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await
                    };
                    if let Err(e) = written.await {
                        error!("Failed to write dead letter: {}", e);
                    }
                }
                Err(e) => error!("Failed to encode dead letter: {}", e),
            }
        }
    });
    sender
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> Result<i32, Box<dyn std::error::Error>> {
    info!("Configuration is valid");

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    if config.mqtt.key_env.is_some() && config.get_mqtt_key().is_none() {
        warn!(
            "Broker key variable {} is not set",
            config.mqtt.key_env.as_deref().unwrap_or_default()
        );
    }

    Ok(0)
}

async fn run_prediction(config: &BridgeConfig, image: &Path) -> Result<i32, Box<dyn std::error::Error>> {
    let predictor = AzureFacePredictor::new(AzureFaceConfig::from_bridge_config(config)?)?;
    let bytes = tokio::fs::read(image).await?;
    info!(image = %image.display(), bytes = bytes.len(), "Requesting prediction");

    let outcome = predictor.predict(Bytes::from(bytes)).await;
    let failed = outcome.is_error();
    println!("{}", serde_json::to_string_pretty(&outcome.into_extended_data())?);

    Ok(if failed { 1 } else { 0 })
}
