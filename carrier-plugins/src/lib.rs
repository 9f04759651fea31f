//! Carrier artifact handling
//!
//! This crate fetches plugin artifacts from their registry, verifies them
//! against the certified SHA-256 hash and places them on disk. Nothing is
//! written before the downloaded bytes have been verified.

pub mod installer;
pub mod registry;
pub mod verifier;

pub use registry::{ArtifactStore, HttpArtifactStore};
