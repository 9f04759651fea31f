//! Configuration management
//!
//! This module handles loading, validation, and management of the carrier
//! configuration. Configuration is stored in TOML format at
//! ~/.carrier/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **deploy**: Record namespace, install roots, deployment group
//! - **dispatcher**: Queue capacity and completion deadline
//! - **environments**: Store addresses and the variables holding their tokens
//!
//! Tokens are never written to the config file. Each environment names the
//! environment variables the tokens are read from.
//!
//! # Examples
//!
//! ```no_run
//! use carrier_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Namespace: {}", config.deploy.namespace);
//! # Ok(())
//! # }
//! ```

use sdk::errors::CarrierError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Deployment settings
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Known environments
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Record namespace under `super-secrets/Index/`
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory agent-type plugins are installed into
    #[serde(default = "default_agent_bin_root")]
    pub agent_bin_root: PathBuf,

    /// Secret store install root; other plugins go to `<root>/plugins`
    #[serde(default = "default_vault_install_root")]
    pub vault_install_root: PathBuf,

    /// Group that owns agent-type executables
    #[serde(default = "default_deploy_group")]
    pub deploy_group: String,

    /// Grant the memory-lock capability to installed executables
    #[serde(default = "default_true")]
    pub grant_capabilities: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            agent_bin_root: default_agent_bin_root(),
            vault_install_root: default_vault_install_root(),
            deploy_group: default_deploy_group(),
            grant_capabilities: true,
        }
    }
}

impl DeployConfig {
    /// Directory non-agent plugins are installed into
    pub fn vault_plugin_dir(&self) -> PathBuf {
        self.vault_install_root.join("plugins")
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Capacity of the inbound envelope queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds a synchronous caller waits for a deployment outcome
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            completion_timeout_secs: default_completion_timeout(),
        }
    }
}

impl DispatcherConfig {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

/// One environment the carrier serves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment name (dev, QA, staging, prod)
    pub name: String,

    /// Address of the plugin's own record store
    pub vault_address: String,

    /// Address of the certifying record store
    pub certify_address: String,

    /// Environment variable holding the plugin environment token
    pub token_var: String,

    /// Environment variable holding the certifying environment token
    pub certify_token_var: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "TrcVault".to_string()
}

fn default_agent_bin_root() -> PathBuf {
    PathBuf::from("/home/azuredeploy/bin")
}

fn default_vault_install_root() -> PathBuf {
    PathBuf::from("/etc/opt/vault")
}

fn default_deploy_group() -> String {
    "azuredeploy".to_string()
}

fn default_queue_capacity() -> usize {
    5
}

fn default_completion_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default location (~/.carrier/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, CarrierError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, CarrierError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| CarrierError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| CarrierError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, CarrierError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CarrierError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| CarrierError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CarrierError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.carrier/config.toml)
    fn default_config_path() -> Result<PathBuf, CarrierError> {
        let home = dirs::home_dir()
            .ok_or_else(|| CarrierError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".carrier").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
            },
            deploy: DeployConfig::default(),
            dispatcher: DispatcherConfig::default(),
            environments: Vec::new(),
        }
    }

    /// Look up an environment by name
    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig, CarrierError> {
        self.environments
            .iter()
            .find(|env| env.name == name)
            .ok_or_else(|| CarrierError::Config(format!("Unknown environment '{}'", name)))
    }

    /// Validate configuration and process paths
    fn validate_and_process(&mut self) -> Result<(), CarrierError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(CarrierError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.deploy.namespace.is_empty() || self.deploy.namespace.contains('/') {
            return Err(CarrierError::Config(format!(
                "Invalid namespace '{}'",
                self.deploy.namespace
            )));
        }

        if self.dispatcher.queue_capacity == 0 {
            return Err(CarrierError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.completion_timeout_secs == 0 {
            return Err(CarrierError::Config(
                "completion_timeout_secs must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for env in &self.environments {
            if env.name.is_empty() {
                return Err(CarrierError::Config("Environment name is empty".to_string()));
            }
            if !seen.insert(env.name.as_str()) {
                return Err(CarrierError::Config(format!(
                    "Environment '{}' is defined twice",
                    env.name
                )));
            }
            if env.vault_address.is_empty() || env.certify_address.is_empty() {
                return Err(CarrierError::Config(format!(
                    "Environment '{}' needs both vault_address and certify_address",
                    env.name
                )));
            }
            if env.vault_address == env.certify_address && env.token_var == env.certify_token_var {
                return Err(CarrierError::Config(format!(
                    "Environment '{}' uses the same credentials for the plugin and certifying stores",
                    env.name
                )));
            }
        }

        self.deploy.agent_bin_root = expand_path(&self.deploy.agent_bin_root)?;
        self.deploy.vault_install_root = expand_path(&self.deploy.vault_install_root)?;

        Ok(())
    }
}

/// Expand ~ to home directory in paths
pub fn expand_path(path: &Path) -> Result<PathBuf, CarrierError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| CarrierError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| CarrierError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| CarrierError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
