// Carrier plugin certification and deployment
// Main entry point for the carrier binary

use clap::Parser;
use carrier_engine::cli::{Cli, Command};
use carrier_engine::config::Config;
use carrier_engine::handlers::{
    handle_certify, handle_define_service, handle_deploy, handle_plugins_list, handle_promote,
    handle_serve, handle_status, OutputFormat,
};
use carrier_engine::telemetry::init_telemetry_with_level;
use sdk::errors::{CarrierError, CarrierErrorExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Carrier v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let result = match cli.command {
        Command::Serve { envs, interval } => {
            tracing::info!("Starting dispatcher...");
            handle_serve(&config, &envs, interval, format).await
        }

        Command::Deploy { env, plugin } => {
            tracing::info!(env = %env, "Deploying plugins");
            handle_deploy(&config, &env, plugin.as_deref(), format).await
        }

        Command::Certify {
            tool,
            define_service,
        } => {
            tracing::info!(env = %tool.env, "Certifying plugin");
            handle_certify(&config, &tool, define_service, format).await
        }

        Command::DefineService { tool } => {
            tracing::info!(env = %tool.env, "Defining service");
            handle_define_service(&config, &tool, format).await
        }

        Command::Status {
            env,
            plugin,
            sha256,
            deployed,
        } => handle_status(&config, &env, &plugin, sha256.as_deref(), deployed, format).await,

        Command::Promote { env, plugins } => {
            tracing::info!(env = %env, count = plugins.len(), "Promoting plugins");
            handle_promote(&config, &env, &plugins, format).await
        }

        Command::Plugins { env } => handle_plugins_list(&config, &env, format).await,
    };

    if let Err(e) = &result {
        if let Some(carrier_err) = e.downcast_ref::<CarrierError>() {
            eprintln!("Hint: {}", carrier_err.user_hint());
        }
    }
    result
}
