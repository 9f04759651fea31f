//! CLI interface for Carrier
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for certifying plugins and
//! deploying them to this host.

use clap::{Parser, Subcommand};
use sdk::record::PluginType;
use std::path::PathBuf;

/// Carrier plugin certification and deployment
///
/// Certifies plugin artifacts against a record store and deploys the certified
/// artifacts to the hosts they are scheduled on.
#[derive(Parser, Debug)]
#[command(name = "carrier")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dispatcher, bootstrapping every configured environment
    Serve {
        /// Only serve these environments
        #[arg(long = "env", value_name = "ENV")]
        envs: Vec<String>,

        /// Seconds between re-checks of known plugins (0 disables)
        #[arg(long, default_value = "0")]
        interval: u64,
    },

    /// Deploy certified plugins to this host
    Deploy {
        /// Environment to deploy from
        #[arg(long)]
        env: String,

        /// Plugin to deploy (default: every certified plugin)
        plugin: Option<String>,
    },

    /// Certify a plugin from a tool config file
    Certify {
        #[command(flatten)]
        tool: ToolArgs,

        /// Also record the service definition fields
        #[arg(long)]
        define_service: bool,
    },

    /// Record the service definition of a plugin
    DefineService {
        #[command(flatten)]
        tool: ToolArgs,
    },

    /// Check whether a plugin has been copied or deployed
    Status {
        /// Environment holding the record
        #[arg(long)]
        env: String,

        /// Plugin name
        plugin: String,

        /// Expected hash (default: the certified hash)
        #[arg(long)]
        sha256: Option<String>,

        /// Require the plugin to be deployed, not only copied
        #[arg(long)]
        deployed: bool,
    },

    /// Mark copied plugins as deployed
    Promote {
        /// Environment holding the records
        #[arg(long)]
        env: String,

        /// Plugins to promote
        #[arg(required = true)]
        plugins: Vec<String>,
    },

    /// List certified plugins
    Plugins {
        /// Environment holding the records
        #[arg(long)]
        env: String,
    },
}

/// Inputs shared by the certification commands
#[derive(clap::Args, Debug, Clone)]
pub struct ToolArgs {
    /// Environment holding the record
    #[arg(long)]
    pub env: String,

    /// Tool config file (TOML)
    #[arg(long, value_name = "PATH")]
    pub tool: PathBuf,

    /// Operator-declared hash, overrides the tool config
    #[arg(long)]
    pub sha256: Option<String>,

    /// Plugin type
    #[arg(long = "type", value_name = "TYPE", default_value = "vault", value_parser = parse_plugin_type)]
    pub plugin_type: PluginType,

    /// Value substituted for the path parameter token in deploy roots
    #[arg(long)]
    pub path_param: Option<String>,
}

fn parse_plugin_type(value: &str) -> Result<PluginType, String> {
    value.parse::<PluginType>().map_err(|e| e.to_string())
}
