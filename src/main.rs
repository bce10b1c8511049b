//! Tollgate - machine-to-machine credential broker
//!
#![doc = "Tollgate - machine-to-machine credential broker"]
#![doc = "Main entry point for the Tollgate command line."]

use anyhow::Result;

use tollgate::cli::{Cli, Commands};
use tollgate::commands;
use tollgate::config::Config;
use tollgate::logging::init_logging;
use tollgate::telemetry::init_metrics_exporter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/tollgate.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    init_logging(&config.logging)?;
    init_metrics_exporter();

    // Execute command
    match cli.command {
        Commands::Provision { service } => {
            tracing::info!("Provisioning service {}", service);
            commands::provision::run_provision(config, service).await
        }
        Commands::Deprovision { service } => {
            tracing::info!("Deprovisioning service {}", service);
            commands::provision::run_deprovision(config, service).await
        }
        Commands::Token { service, show } => {
            commands::token::run_token(config, service, show).await
        }
        Commands::Tools {
            service,
            resource,
            qualifier,
        } => {
            tracing::debug!("Listing capabilities of {}", resource);
            commands::resource::list_tools(config, service, resource, qualifier).await
        }
        Commands::Invoke {
            service,
            resource,
            tool,
            args,
            qualifier,
        } => {
            tracing::debug!("Invoking {} on {}", tool, resource);
            commands::resource::invoke(config, service, resource, tool, args, qualifier).await
        }
    }
}
