//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - serve: run the dispatcher and bootstrap environments
//! - deploy: deploy certified plugins to this host
//! - certify / define-service: write certification records
//! - status: check copy and deploy status
//! - promote: mark copied plugins as deployed
//! - plugins: list certified plugins

use anyhow::{bail, Context, Result};
use carrier_plugins::HttpArtifactStore;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval};

use crate::certify::{self, StatusCheck};
use crate::cli::ToolArgs;
use crate::config::{Config, EnvironmentConfig};
use crate::deploy::{DeploySettings, PluginDeployer};
use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::envelope::{Credentials, DeployOutcome, EnvConfigEnvelope};
use crate::platform::SystemPlatform;
use crate::secrets::{self, token_from_env};
use crate::store::{FileStoreConnector, RecordStore, StoreConnector};
use sdk::record::ToolConfig;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run the dispatcher until interrupted.
///
/// Every selected environment is bootstrapped once. With a non-zero
/// `interval` the known plugins are re-submitted periodically, which
/// re-verifies what is on disk.
pub async fn handle_serve(
    config: &Config,
    envs: &[String],
    interval: u64,
    format: OutputFormat,
) -> Result<()> {
    let served = select_environments(config, envs)?;
    if served.is_empty() {
        bail!("No environments configured. Add an [[environments]] section to the config file");
    }

    let deployer = build_deployer(config)?;
    let (dispatcher, handle) = Dispatcher::new(deployer, config.dispatcher.queue_capacity);
    let dispatcher_task = dispatcher.spawn();
    let deadline = config.dispatcher.completion_timeout();

    for env in &served {
        let envelope = EnvConfigEnvelope::bootstrap(
            env.name.clone(),
            vault_credentials(env)?,
            certify_credentials(env)?,
        );
        let outcome = handle.deploy_and_wait(envelope, deadline).await;
        print_outcome(&env.name, None, &outcome, format)?;
    }

    let mut ticker = (interval > 0).then(|| {
        let period = Duration::from_secs(interval);
        tokio::time::interval_at(Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, shutting down");
                break;
            }
            _ = next_tick(&mut ticker) => {
                for env in &served {
                    if let Err(e) = resubmit_known(&handle, env).await {
                        tracing::warn!(env = %env.name, error = %e, "Re-check skipped");
                    }
                }
            }
        }
    }

    drop(handle);
    dispatcher_task
        .await
        .context("Dispatcher task failed")?;
    Ok(())
}

/// Deploy one plugin, or every certified plugin, to this host
pub async fn handle_deploy(
    config: &Config,
    env_name: &str,
    plugin: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let env = config.environment(env_name)?;
    let vault = vault_credentials(env)?;
    let certify = certify_credentials(env)?;

    let store = FileStoreConnector.connect(&certify.address, &certify.token)?;
    let known = certify::list_certified_plugins(store.as_ref(), &config.deploy.namespace).await?;

    let targets = match plugin {
        Some(name) if !known.iter().any(|k| k == name) => {
            bail!("{} is not a supported plugin in {}", name, env_name)
        }
        Some(name) => vec![name.to_string()],
        None => known,
    };

    let deployer = build_deployer(config)?;
    let deadline = config.dispatcher.completion_timeout();
    let mut failures = 0;

    for name in &targets {
        let envelope =
            EnvConfigEnvelope::for_plugin(env_name, name.as_str(), vault.clone(), certify.clone());
        let outcome = match tokio::time::timeout(deadline, deployer.deploy(&envelope)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => DeployOutcome::Failed {
                error: secrets::scrub(&e.to_string(), &[&vault.token, &certify.token]),
            },
            Err(_) => DeployOutcome::TimedOut,
        };

        if matches!(outcome, DeployOutcome::Failed { .. } | DeployOutcome::TimedOut) {
            failures += 1;
        }
        print_outcome(env_name, Some(name.as_str()), &outcome, format)?;
    }

    if failures > 0 {
        bail!("{} of {} deployments failed", failures, targets.len());
    }
    Ok(())
}

/// Certify a plugin image and record it
pub async fn handle_certify(
    config: &Config,
    args: &ToolArgs,
    define_service: bool,
    format: OutputFormat,
) -> Result<()> {
    let env = config.environment(&args.env)?;
    let store = certify_store(env)?;
    let tool = load_tool(&args.tool, args.sha256.as_deref())?;
    let artifacts = HttpArtifactStore::new()?;

    let record = certify::certify_plugin(
        store.as_ref(),
        &artifacts,
        &config.deploy.namespace,
        &tool,
        args.plugin_type,
        define_service,
        args.path_param.as_deref(),
    )
    .await?;

    match format {
        OutputFormat::Text => {
            println!("Certified {}", record.plugin_name);
            println!("  Type:      {}", record.plugin_type);
            println!("  SHA-256:   {}", record.certified_hash);
            println!("  Instances: {}", record.instance_list);
        }
        OutputFormat::Json => {
            let output = json!({
                "plugin": record.plugin_name,
                "type": record.plugin_type.as_str(),
                "sha256": record.certified_hash,
                "instances": record.instance_list.to_string(),
                "copied": record.copied,
                "deployed": record.deployed,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Record a service definition without certifying an image
pub async fn handle_define_service(
    config: &Config,
    args: &ToolArgs,
    format: OutputFormat,
) -> Result<()> {
    let env = config.environment(&args.env)?;
    let store = certify_store(env)?;
    let tool = load_tool(&args.tool, args.sha256.as_deref())?;

    let record = certify::define_service(
        store.as_ref(),
        &config.deploy.namespace,
        &tool,
        args.plugin_type,
        args.path_param.as_deref(),
    )
    .await?;

    match format {
        OutputFormat::Text => {
            println!("Service defined for {}", record.plugin_name);
            if let Some(root) = &record.deploy_root {
                println!("  Deploy root: {}", root);
            }
            if let Some(bundle) = &record.code_bundle_name {
                println!("  Code bundle: {}", bundle);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "plugin": record.plugin_name,
                "type": record.plugin_type.as_str(),
                "deploy_root": record.deploy_root,
                "deploy_subpath": record.deploy_subpath,
                "code_bundle": record.code_bundle_name,
                "service": record.service_name,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Check whether a plugin reached the copied or deployed stage
pub async fn handle_status(
    config: &Config,
    env_name: &str,
    plugin: &str,
    sha256: Option<&str>,
    deployed: bool,
    format: OutputFormat,
) -> Result<()> {
    let env = config.environment(env_name)?;
    let store = certify_store(env)?;
    let artifacts = HttpArtifactStore::new()?;
    let check = if deployed {
        StatusCheck::Deployed
    } else {
        StatusCheck::Copied
    };

    let report = certify::check_status(
        store.as_ref(),
        &artifacts,
        &config.deploy.namespace,
        plugin,
        sha256,
        check,
    )
    .await?;

    match format {
        OutputFormat::Text => println!("{}: {}", plugin, report),
        OutputFormat::Json => {
            let output = json!({ "plugin": plugin, "status": report });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Mark copied plugins as deployed
pub async fn handle_promote(
    config: &Config,
    env_name: &str,
    plugins: &[String],
    format: OutputFormat,
) -> Result<()> {
    let env = config.environment(env_name)?;
    let store = certify_store(env)?;
    let promoted =
        certify::promote_deployed(store.as_ref(), &config.deploy.namespace, plugins).await?;

    match format {
        OutputFormat::Text => {
            if promoted.is_empty() {
                println!("No plugins promoted.");
            }
            for name in &promoted {
                println!("Promoted {}", name);
            }
        }
        OutputFormat::Json => {
            let output = json!({ "promoted": promoted });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// List the plugins certified in an environment
pub async fn handle_plugins_list(
    config: &Config,
    env_name: &str,
    format: OutputFormat,
) -> Result<()> {
    let env = config.environment(env_name)?;
    let store = certify_store(env)?;
    let plugins = certify::list_certified_plugins(store.as_ref(), &config.deploy.namespace).await?;

    match format {
        OutputFormat::Text => {
            println!("Certified plugins in {}:", env_name);
            println!();
            for name in &plugins {
                println!("  {}", name);
            }
            println!();
            println!("{} plugin(s).", plugins.len());
        }
        OutputFormat::Json => {
            let output = json!({ "env": env_name, "plugins": plugins });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn build_deployer(config: &Config) -> Result<Arc<PluginDeployer>> {
    let artifacts = HttpArtifactStore::new()?;
    Ok(Arc::new(PluginDeployer::new(
        DeploySettings::from(&config.deploy),
        Arc::new(FileStoreConnector),
        Arc::new(artifacts),
        Arc::new(SystemPlatform),
    )))
}

fn select_environments<'a>(
    config: &'a Config,
    names: &[String],
) -> Result<Vec<&'a EnvironmentConfig>> {
    if names.is_empty() {
        return Ok(config.environments.iter().collect());
    }
    names
        .iter()
        .map(|name| config.environment(name).map_err(Into::into))
        .collect()
}

fn vault_credentials(env: &EnvironmentConfig) -> Result<Credentials> {
    let token = token_from_env(&env.token_var)
        .with_context(|| format!("Missing token for environment '{}'", env.name))?;
    Ok(Credentials::new(env.vault_address.clone(), token))
}

fn certify_credentials(env: &EnvironmentConfig) -> Result<Credentials> {
    let token = token_from_env(&env.certify_token_var)
        .with_context(|| format!("Missing certify token for environment '{}'", env.name))?;
    Ok(Credentials::new(env.certify_address.clone(), token))
}

fn certify_store(env: &EnvironmentConfig) -> Result<Arc<dyn RecordStore>> {
    let certify = certify_credentials(env)?;
    Ok(FileStoreConnector.connect(&certify.address, &certify.token)?)
}

/// Read a tool config file, applying the command-line hash override
fn load_tool(path: &Path, sha256: Option<&str>) -> Result<ToolConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tool config {}", path.display()))?;
    let mut tool: ToolConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse tool config {}", path.display()))?;

    if let Some(hash) = sha256.filter(|s| !s.is_empty()) {
        tool.sha256 = Some(hash.to_string());
    }
    Ok(tool)
}

async fn resubmit_known(handle: &DispatcherHandle, env: &EnvironmentConfig) -> Result<()> {
    let Some(plugins) = handle.known_plugins(&env.name).await else {
        return Ok(());
    };
    let vault = vault_credentials(env)?;
    let certify = certify_credentials(env)?;

    for plugin in plugins {
        let envelope =
            EnvConfigEnvelope::for_plugin(env.name.clone(), plugin, vault.clone(), certify.clone());
        if !handle.submit(envelope).await {
            bail!("Dispatcher stopped");
        }
    }
    Ok(())
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_outcome(
    env: &str,
    plugin: Option<&str>,
    outcome: &DeployOutcome,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => match plugin {
            Some(plugin) => println!("[{}] {}: {}", env, plugin, outcome),
            None => println!("[{}] {}", env, outcome),
        },
        OutputFormat::Json => {
            let output = json!({ "env": env, "plugin": plugin, "result": outcome });
            println!("{}", serde_json::to_string(&output)?);
        }
    }
    Ok(())
}
