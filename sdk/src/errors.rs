//! Error types and handling
//!
//! This module provides the error type shared by the carrier engine and the
//! plugin-handling crate. All errors implement the `CarrierErrorExt` trait which
//! provides operator-facing hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Error messages never carry store tokens. Hashes and plugin names are
//! included since they are already part of the fleet-wide record.

use thiserror::Error;

/// Trait for carrier error extensions
///
/// Provides additional context for errors, including operator hints and
/// recoverability information.
pub trait CarrierErrorExt {
    /// Returns a short hint for the operator
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors go away on a later dispatch cycle without operator
    /// action (network blips, a store briefly unavailable). Non-recoverable
    /// errors need a new certification or a configuration fix.
    fn is_recoverable(&self) -> bool;
}

/// Main carrier error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{CarrierError, CarrierErrorExt};
///
/// let error = CarrierError::Registry("connection reset".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let refused = CarrierError::IntegrityMismatch {
///     plugin: "vault-plugin".to_string(),
///     expected: "aa".to_string(),
///     actual: "bb".to_string(),
/// };
/// assert!(!refused.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum CarrierError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid plugin name: {0}")]
    InvalidPluginName(String),

    #[error("Invalid path parameter: {0}")]
    InvalidPathParam(String),

    // External collaborators
    #[error("Record store error: {0}")]
    RecordStore(String),

    #[error("Artifact registry error: {0}")]
    Registry(String),

    // Integrity errors
    #[error("Integrity mismatch for {plugin}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        plugin: String,
        expected: String,
        actual: String,
    },

    #[error("Plugin not deployable: {0}")]
    NotDeployable(String),

    // Host errors
    #[error("Permission error: {0}")]
    Permission(String),

    #[error("Capability grant failed: {0}")]
    Capability(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CarrierErrorExt for CarrierError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml and the environment credentials",
            Self::InvalidPluginName(_) => "Plugin names may not contain '.' or '/'",
            Self::InvalidPathParam(_) => "Path parameters may only contain letters, digits and '_'",

            Self::RecordStore(_) => "Record store unavailable. Check the certify address and token",
            Self::Registry(_) => "Artifact registry unavailable. Check the registry URL and network",

            Self::IntegrityMismatch { .. } => {
                "Downloaded artifact does not match the certified hash. Re-certify the plugin"
            }
            Self::NotDeployable(_) => "Plugin is not certified for deployment",

            Self::Permission(_) => "Could not set ownership on the deployed artifact",
            Self::Capability(_) => "Could not grant the memory-lock capability",
            Self::Serialization(_) => "Stored record is malformed",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::InvalidPluginName(_)
            | Self::InvalidPathParam(_)
            | Self::IntegrityMismatch { .. }
            | Self::NotDeployable(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

impl From<serde_json::Error> for CarrierError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
