//! edgebridge - MQTT to NATS edge gateway bridge
//!
//! Usage:
//!   edgebridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>      Configuration file path
//!   -m, --mqtt <ADDR>        MQTT broker address (default: mosquitto:1883)
//!   -n, --nats <URL>         NATS server URL (default: nats://nats:4222)
//!   -b, --basename <NAME>    Prefix for endpoints and subjects
//!   -d, --device-id <ID>     Device id stamped on forwarded messages
//!   -l, --log-level          Log level (error, warn, info, debug, trace)
//!   -h, --help               Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use edgebridge::bridge::{BridgeCore, BridgeService};
use edgebridge::config::Config;
use edgebridge::connector::{MqttConnector, NatsBus};
use edgebridge::{Metrics, MetricsServer};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::default(),
        }
    }
}

/// edgebridge - MQTT to NATS edge gateway bridge
#[derive(Parser, Debug)]
#[command(name = "edgebridge")]
#[command(author = "edgebridge Contributors")]
#[command(version)]
#[command(about = "Relays MQTT topics onto dynamically allocated NATS subjects")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker address (host:port)
    #[arg(short, long)]
    mqtt: Option<String>,

    /// NATS server URL
    #[arg(short, long)]
    nats: Option<String>,

    /// Prefix for the bridge endpoints and generated subjects
    #[arg(short, long)]
    basename: Option<String>,

    /// Device id stamped on forwarded messages
    #[arg(short, long)]
    device_id: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus environment
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI args override file config
    if let Some(mqtt) = args.mqtt {
        config.mqtt.address = mqtt;
    }
    if let Some(nats) = args.nats {
        config.nats.url = nats;
    }
    if let Some(basename) = args.basename {
        config.bridge.basename = basename;
    }
    if let Some(device_id) = args.device_id {
        config.bridge.device_id = device_id;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    info!("Starting edgebridge");
    info!("  MQTT broker: {}", config.mqtt.address);
    info!("  NATS server: {}", config.nats.url);
    info!("  Basename: {}", config.bridge.basename);
    info!("  Device: {}", config.bridge.device_id);
    info!("  Wire format: {}", config.bridge.wire_format);
    info!(
        "  Forwarding: queue={} timeout={:?}",
        config.bridge.queue_capacity, config.bridge.forward_timeout
    );

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new());
        info!("  Metrics: enabled (http://{})", config.metrics.bind);

        let metrics_server = MetricsServer::new(metrics.clone(), config.metrics.bind);
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run().await {
                error!("Metrics server error: {}", e);
            }
        });
        Some(metrics)
    } else {
        info!("  Metrics: disabled");
        None
    };

    let bus = match NatsBus::connect(&config.nats).await {
        Ok(bus) => bus,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let (core, events) = BridgeCore::new(config.bridge.clone(), Arc::new(bus.clone()), metrics.clone());

    let connector = MqttConnector::new(config.mqtt.clone(), config.bridge.response_filter())
        .with_metrics(metrics);
    let connector_task = connector.spawn(events, Arc::new(core.clone()));

    let requests = bus.serve(&config.bridge.basename).await?;
    let service = BridgeService::new(core);

    tokio::select! {
        _ = service.run(requests) => {
            info!("Bus request stream ended");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown requested");
        }
    }

    connector_task.abort();
    info!("MQTT connector status at shutdown: {:?}", connector.status());
    if let Err(e) = bus.flush().await {
        error!("Failed to flush NATS: {}", e);
    }
    info!("edgebridge stopped");

    Ok(())
}
