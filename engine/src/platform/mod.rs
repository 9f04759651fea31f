//! Platform-specific host operations
//!
//! Deployment needs three things from the host: its name (for instance
//! affinity), group ownership of installed executables, and the capability
//! that lets a plugin lock its memory. `HostPlatform` abstracts these so the
//! state machine reads the same on every OS.
//!
//! On platforms without an equivalent concept the operations are explicit
//! no-ops that log at debug level.

use async_trait::async_trait;
use regex::Regex;
use sdk::errors::CarrierError;
use std::path::Path;
use std::sync::OnceLock;

/// Capability granted to installed executables on Linux
pub const SECURE_MEMORY_CAPABILITY: &str = "cap_ipc_lock=+ep";

/// Host operations used by the deployment state machine
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Name of this host
    fn hostname(&self) -> Result<String, CarrierError>;

    /// Give group ownership of `path` to `group`
    async fn assign_group(&self, path: &Path, group: &str) -> Result<(), CarrierError>;

    /// Allow the executable at `path` to lock memory
    async fn grant_secure_memory_capability(&self, path: &Path) -> Result<(), CarrierError>;
}

fn ordinal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-([0-9]+)$").expect("Invalid ordinal pattern"))
}

/// Instance ordinal of a host: the trailing `-<digits>` of its name, or 0.
///
/// ```
/// use carrier_engine::platform::host_ordinal;
///
/// assert_eq!(host_ordinal("vault-2"), 2);
/// assert_eq!(host_ordinal("vault"), 0);
/// ```
pub fn host_ordinal(hostname: &str) -> u32 {
    ordinal_pattern()
        .captures(hostname)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// The real host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPlatform;

#[async_trait]
impl HostPlatform for SystemPlatform {
    #[cfg(unix)]
    fn hostname(&self) -> Result<String, CarrierError> {
        let name = nix::unistd::gethostname()
            .map_err(|e| CarrierError::Config(format!("Failed to read hostname: {}", e)))?;
        name.into_string()
            .map_err(|_| CarrierError::Config("Hostname is not valid UTF-8".to_string()))
    }

    #[cfg(not(unix))]
    fn hostname(&self) -> Result<String, CarrierError> {
        std::env::var("COMPUTERNAME")
            .map_err(|_| CarrierError::Config("Failed to read hostname".to_string()))
    }

    #[cfg(unix)]
    async fn assign_group(&self, path: &Path, group: &str) -> Result<(), CarrierError> {
        use nix::unistd::{chown, Group};

        let gid = Group::from_name(group)
            .map_err(|e| CarrierError::Permission(format!("Group lookup failed: {}", e)))?
            .ok_or_else(|| CarrierError::Permission(format!("Group '{}' not found", group)))?
            .gid;

        chown(path, None, Some(gid)).map_err(|e| {
            CarrierError::Permission(format!("chgrp {} {}: {}", group, path.display(), e))
        })
    }

    #[cfg(not(unix))]
    async fn assign_group(&self, path: &Path, group: &str) -> Result<(), CarrierError> {
        tracing::debug!(path = %path.display(), group, "Group ownership not supported, skipping");
        Ok(())
    }

    #[cfg(target_os = "linux")]
    async fn grant_secure_memory_capability(&self, path: &Path) -> Result<(), CarrierError> {
        let output = tokio::process::Command::new("setcap")
            .arg(SECURE_MEMORY_CAPABILITY)
            .arg(path)
            .output()
            .await
            .map_err(|e| CarrierError::Capability(format!("Failed to run setcap: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CarrierError::Capability(format!(
                "setcap exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    #[cfg(not(target_os = "linux"))]
    async fn grant_secure_memory_capability(&self, path: &Path) -> Result<(), CarrierError> {
        tracing::debug!(path = %path.display(), "Memory-lock capability not supported, skipping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_ordinal_trailing_digits() {
        assert_eq!(host_ordinal("carrier-0"), 0);
        assert_eq!(host_ordinal("carrier-12"), 12);
        assert_eq!(host_ordinal("east-3-vault-1"), 1);
    }

    #[test]
    fn test_host_ordinal_defaults_to_zero() {
        assert_eq!(host_ordinal("carrier"), 0);
        assert_eq!(host_ordinal("carrier-"), 0);
        assert_eq!(host_ordinal("carrier-1a"), 0);
        assert_eq!(host_ordinal(""), 0);
    }

    #[test]
    fn test_host_ordinal_overflow_defaults_to_zero() {
        assert_eq!(host_ordinal("carrier-99999999999999999999"), 0);
    }

    #[tokio::test]
    async fn test_system_hostname_is_readable() {
        let name = SystemPlatform.hostname().unwrap();
        assert!(!name.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_assign_unknown_group_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = SystemPlatform
            .assign_group(file.path(), "carrier-no-such-group")
            .await;
        assert!(matches!(result, Err(CarrierError::Permission(_))));
    }
}
