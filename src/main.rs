//! telemetrix - MQTT publisher with peer liveness tracking

use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use telemetrix::config::{ConfigError, ConfigFile};
use telemetrix::console::{spawn_blocking_reader, Console, ConsoleExit};
use telemetrix::observability::init_default_logging;
use telemetrix::session::ConnectionController;
use telemetrix::transport::MqttTransport;
use tokio::io::BufReader;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["telemetrix.toml", "config/telemetrix.toml"];

/// Publish operator messages over MQTT while watching a device heartbeat
#[derive(Parser)]
#[command(name = "telemetrix")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override the broker URL
    #[arg(long, env = "TELEMETRIX_BROKER_URL", global = true)]
    broker_url: Option<String>,

    /// Override the outbound topic
    #[arg(long, env = "TELEMETRIX_OUTBOUND_TOPIC", global = true)]
    outbound_topic: Option<String>,

    /// Override the peer status topic
    #[arg(long, env = "TELEMETRIX_STATUS_TOPIC", global = true)]
    status_topic: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and start the interactive session
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose > 0);
    info!("Starting telemetrix v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_session(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Load the file (explicit path or the first default that exists), apply
/// command-line overrides and validate. Without any file a broker URL override
/// is enough to run on defaults.
fn load_configuration(cli: &Cli) -> Result<ConfigFile, ConfigError> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    };

    let mut config = match (path, &cli.broker_url) {
        (Some(path), _) => {
            info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        }
        (None, Some(url)) => ConfigFile::for_broker(url),
        (None, None) => {
            return Err(ConfigError::InvalidConfig(
                "no configuration file found; pass -c/--config, create telemetrix.toml, or set --broker-url"
                    .to_string(),
            ))
        }
    };

    config.apply_overrides(
        cli.broker_url.as_deref(),
        cli.outbound_topic.as_deref(),
        cli.status_topic.as_deref(),
    );
    config.validate()?;
    Ok(config)
}

async fn run_session(config: ConfigFile) -> Result<(), Box<dyn std::error::Error>> {
    let session_config = config.resolve()?;
    info!(
        broker = %session_config.broker,
        outbound = %session_config.outbound_topic,
        status = %session_config.status_topic,
        "Session configured"
    );

    let transport = MqttTransport::new(session_config.clone());
    let controller = ConnectionController::new(session_config, transport);

    if let Err(e) = controller.start().await {
        error!("{}", e.operator_message());
        return Err(e.into());
    }

    println!("Connected. Type a message and press Enter to publish; 'exit' to quit.");

    // A pending stdin read must not hold the runtime open after Ctrl-C
    let stdin = match spawn_blocking_reader(std::io::stdin()) {
        Ok(input) => BufReader::new(input),
        Err(e) => {
            error!("Failed to start console input: {}", e);
            if let Err(stop_error) = controller.stop().await {
                warn!("{}", stop_error.operator_message());
            }
            return Err(e.into());
        }
    };
    let mut console = Console::new(controller.clone(), tokio::io::stdout());
    if !std::io::stdin().is_terminal() {
        console = console.without_prompt();
    }

    let exit = console.run(stdin, shutdown_signal()).await;
    if exit == ConsoleExit::InputError {
        warn!("Console input failed; session stopped");
    }

    let snapshot = controller.metrics().snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(metrics = %json, "Session metrics"),
        Err(e) => warn!("Failed to serialize session metrics: {}", e),
    }

    Ok(())
}

fn handle_config_command(config: ConfigFile, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down gracefully..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl-C, shutting down gracefully...");
}
