//! Carrier Engine Library
//!
//! This library provides plugin certification and deployment for the
//! carrier binary. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Secret handling module
pub mod secrets;

/// Host platform abstraction
pub mod platform;

/// Certification record stores
pub mod store;

/// Certification record building and operations
pub mod certify;

/// Deployment state machine
pub mod deploy;

/// Work envelopes and completion signalling
pub mod envelope;

/// Config distribution dispatcher
pub mod dispatcher;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
