//! Carrier SDK
//!
//! Shared types for the carrier engine and the plugin-handling crate:
//! the error type and the certification record model.

/// Error types and handling
pub mod errors;

/// Certification record model
pub mod record;

// Re-export commonly used types
pub use errors::{CarrierError, CarrierErrorExt};
pub use record::{
    validate_plugin_name, CertificationRecord, HostStatus, InstanceList, PluginType, ToolConfig,
};
