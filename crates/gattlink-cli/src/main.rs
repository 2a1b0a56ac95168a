//! gattlink CLI entry point

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use gattlink_ble::BtleplugPlatform;
use gattlink_cli::{cli::Cli, commands::CommandDispatcher, config::CliConfig, error::Result};
use gattlink_core::BlePlatform;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let config = load_configuration(&cli)?
        .with_overrides(cli.cache_dir.as_deref(), cli.adapter.as_deref());

    // Bring up the adapter only when the command uses the radio
    let platform = if cli.command.needs_adapter() {
        match open_platform(&config).await {
            Ok(platform) => Some(platform),
            Err(e) => {
                error!("Failed to initialize BLE: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    // Execute the command
    let dispatcher = CommandDispatcher::new(config, platform);
    if let Err(e) = dispatcher.execute(cli.command).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Bring up the BLE adapter selected by the configuration
async fn open_platform(config: &CliConfig) -> Result<Arc<dyn BlePlatform>> {
    let platform = BtleplugPlatform::new(&config.gatt).await?;
    info!("Using {}", platform.adapter_info().await);
    Ok(Arc::new(platform))
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<CliConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        CliConfig::load_from_file(config_path)
    } else {
        Ok(CliConfig::default())
    }
}
