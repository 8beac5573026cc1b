//! devlink - Main entry point
//!
//! Small operator console around the link client: connects to a controller,
//! subscribes to telemetry topics, and prints session events until
//! interrupted.

use clap::{Parser, Subcommand};
use devlink::config::LinkConfig;
use devlink::observability::init_default_logging;
use devlink::transport::ws::{LinkEvent, WsClient};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Resilient device-control link client
#[derive(Parser)]
#[command(name = "devlink")]
#[command(about = "Resilient WebSocket link to a remote device controller")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Controller URL override
    #[arg(short, long, value_name = "URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and watch telemetry until interrupted
    Watch {
        /// Topics to subscribe to
        #[arg(short, long, value_delimiter = ',', default_value = "status")]
        topics: Vec<String>,

        /// Device to scope the subscription to
        #[arg(short, long)]
        peer: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let mut config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Some(url) = cli.url {
        config.link.url = url;
    }

    let result = match cli.command {
        Commands::Watch { topics, peer } => watch_telemetry(config, topics, peer).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(LinkConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            for path_str in ["devlink.toml", "config/devlink.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(LinkConfig::load_from_file(&path)?);
                }
            }

            error!("No configuration file found. Provide one with -c/--config or create devlink.toml");
            process::exit(1);
        }
    }
}

async fn watch_telemetry(
    config: LinkConfig,
    topics: Vec<String>,
    peer: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting link client: {}", config.client.id);

    let client = WsClient::new(config.link.clone()).await?;
    let mut events = client.events();

    client
        .connect_as(peer.as_deref(), Some(&config.client.id))
        .await?;
    client.subscribe(topics, peer.as_deref()).await?;
    info!("Connected to {}", config.link.url);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupt received, closing link");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(LinkEvent::Message(envelope)) => {
                        println!(
                            "{} {:?} {}",
                            envelope.timestamp,
                            envelope.message_type,
                            envelope.payload
                        );
                    }
                    Ok(LinkEvent::StateChanged { previous, current }) => {
                        info!(?previous, ?current, "connection state changed");
                    }
                    Ok(LinkEvent::Reconnected) => info!("reconnected, subscriptions restored"),
                    Ok(LinkEvent::ReconnectFailed { attempts }) => {
                        error!(attempts, "reconnection failed; giving up");
                        break;
                    }
                    Ok(LinkEvent::HealthCheckFailed { reason }) => {
                        warn!(reason = %reason, "health check failed");
                    }
                    Err(e) => {
                        warn!("event stream interrupted: {e}");
                        break;
                    }
                }
            }
        }
    }

    client.disconnect().await?;
    info!("Link closed");
    Ok(())
}

fn handle_config_command(
    config: LinkConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    println!("Configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
