//! Fleet tracker simulator - main entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::sync::mpsc;
use tracing::{error, info};
use trackersim::config::TrackerConfig;
use trackersim::observability::init_default_logging;
use trackersim::{
    activation, ConfigListener, CredentialIssuer, DeviceClient, PublishScheduler,
    SimulatedPositions, TrackerResult,
};

/// Simulated fleet tracker device
#[derive(Parser)]
#[command(name = "trackersim")]
#[command(about = "Simulates a fleet tracker device against a cloud MQTT bridge")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Activate the device and run the publish cycle
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<TrackerConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(TrackerConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = vec!["tracker.toml", "config/tracker.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(TrackerConfig::load_from_file(&path)?);
                }
            }

            error!(
                "No configuration file found. Provide one with -c/--config or create tracker.toml"
            );
            process::exit(1);
        }
    }
}

async fn run_device(config: TrackerConfig) -> TrackerResult<()> {
    info!(imei = %config.device.imei, "activating tracker");
    let identity =
        activation::activate(&config.activation.server_url, &config.device.imei).await?;

    // Config updates are logged as they arrive; the simulated device has
    // nothing to reconfigure.
    let (config_tx, mut config_rx) = mpsc::channel::<trackersim::ConfigUpdate>(16);
    tokio::spawn(async move {
        while let Some(update) = config_rx.recv().await {
            info!(document = %update.document, "device configuration updated");
        }
    });

    let listener = ConfigListener::new(identity.device_id.clone(), config_tx);
    let transport = DeviceClient::new(identity.clone(), config.cloud.clone(), listener);

    let issuer = CredentialIssuer::new(
        config.cloud.project_id.clone(),
        config.auth.private_key_path.clone(),
        config.auth.algorithm,
        config.auth.token_ttl_minutes,
    );

    let scheduler = PublishScheduler::new(
        transport,
        SimulatedPositions::new(),
        issuer,
        identity.device_id,
        config.telemetry.clone(),
    );

    scheduler.run().await?;
    info!("publish cycle complete");
    Ok(())
}

fn handle_config_command(config: TrackerConfig, show: bool) -> TrackerResult<()> {
    info!("Configuration is valid");
    if show {
        match toml::to_string_pretty(&config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => error!("Failed to render configuration: {e}"),
        }
    }
    Ok(())
}
