//! Record store access
//!
//! Certification records live in a path-addressed key/value store. Writes are
//! partial updates: the given fields are merged into whatever is already stored
//! at the path, and fields not named in the write are left alone.
//!
//! # Paths
//!
//! - canonical: `super-secrets/Index/<ns>/trcplugin/<plugin>/Certify`
//! - per-host override: `super-secrets/Index/<ns>/trcplugin/overrides/<host>/<plugin>/Certify`

pub mod file;
pub mod memory;

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;

use async_trait::async_trait;
use sdk::errors::CarrierError;
use sdk::record::CertificationRecord;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::secrets::SecretString;

/// Subtree holding per-host override records
pub const OVERRIDES_SEGMENT: &str = "overrides";

/// Stored field map
pub type Fields = Map<String, Value>;

/// Path-addressed record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fields stored at `path`, or `None` when nothing is stored there
    async fn read(&self, path: &str) -> Result<Option<Fields>, CarrierError>;

    /// Merge `fields` into the record at `path`, creating it if needed
    async fn write(&self, path: &str, fields: Fields) -> Result<(), CarrierError>;

    /// Names of the direct children of `path`
    async fn list(&self, path: &str) -> Result<Vec<String>, CarrierError>;
}

/// Opens a record store for an address and token
pub trait StoreConnector: Send + Sync {
    fn connect(
        &self,
        address: &str,
        token: &SecretString,
    ) -> Result<Arc<dyn RecordStore>, CarrierError>;
}

/// Connects `file://` addresses to a [`FileRecordStore`] rooted at the path
#[derive(Debug, Default, Clone, Copy)]
pub struct FileStoreConnector;

impl StoreConnector for FileStoreConnector {
    fn connect(
        &self,
        address: &str,
        token: &SecretString,
    ) -> Result<Arc<dyn RecordStore>, CarrierError> {
        if token.is_empty() {
            return Err(CarrierError::Config(format!(
                "Empty token for store {}",
                address
            )));
        }
        let root = address.strip_prefix("file://").ok_or_else(|| {
            CarrierError::Config(format!("Unsupported record store address '{}'", address))
        })?;
        Ok(Arc::new(FileRecordStore::new(PathBuf::from(root))))
    }
}

/// Index holding every plugin's records
pub fn plugin_index_path(namespace: &str) -> String {
    format!("super-secrets/Index/{}/trcplugin", namespace)
}

/// Fleet-wide record for a plugin
pub fn certify_path(namespace: &str, plugin: &str) -> String {
    format!("{}/{}/Certify", plugin_index_path(namespace), plugin)
}

/// Record for a plugin on one host
pub fn override_path(namespace: &str, hostname: &str, plugin: &str) -> String {
    format!(
        "{}/{}/{}/{}/Certify",
        plugin_index_path(namespace),
        OVERRIDES_SEGMENT,
        hostname,
        plugin
    )
}

/// A record as seen from one host
#[derive(Debug, Clone)]
pub struct HostRecord {
    /// Canonical record with the host override applied
    pub record: CertificationRecord,
    /// Host override as stored, if any
    pub host_override: Option<CertificationRecord>,
}

/// Read the canonical record for `plugin` and apply this host's override.
///
/// The override's `copied` and `deployed` flags replace the canonical ones only
/// while the override was written for the currently certified hash. Its status
/// tag always applies. Agents are installed by every host, so an agent record
/// without a current override reads as not copied on this host. Returns `None`
/// when no canonical record exists.
pub async fn load_host_record(
    store: &dyn RecordStore,
    namespace: &str,
    hostname: &str,
    plugin: &str,
) -> Result<Option<HostRecord>, CarrierError> {
    let Some(fields) = store.read(&certify_path(namespace, plugin)).await? else {
        return Ok(None);
    };
    let mut record = CertificationRecord::from_fields(&fields)?;

    let host_override = match store.read(&override_path(namespace, hostname, plugin)).await? {
        Some(fields) => Some(CertificationRecord::from_fields(&fields)?),
        None => None,
    };

    let current = host_override.as_ref().filter(|over| {
        !over.certified_hash.is_empty() && over.certified_hash == record.certified_hash
    });
    match current {
        Some(over) => {
            record.copied = over.copied;
            record.deployed = over.deployed;
        }
        None if record.effective_type().is_agent() => {
            record.copied = false;
            record.deployed = false;
        }
        None => {}
    }
    if let Some(over) = &host_override {
        record.host_status = over.host_status;
    }

    Ok(Some(HostRecord {
        record,
        host_override,
    }))
}

/// Merge `update` into `base`
pub(crate) fn merge_fields(base: &mut Fields, update: Fields) {
    for (key, value) in update {
        base.insert(key, value);
    }
}

/// Split a store path into its non-empty segments
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::record::HostStatus;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            certify_path("TrcVault", "p"),
            "super-secrets/Index/TrcVault/trcplugin/p/Certify"
        );
        assert_eq!(
            override_path("TrcVault", "host-1", "p"),
            "super-secrets/Index/TrcVault/trcplugin/overrides/host-1/p/Certify"
        );
    }

    #[tokio::test]
    async fn test_override_applies_for_current_hash() {
        let store = MemoryRecordStore::new();
        store
            .write(
                &certify_path("ns", "p"),
                fields(json!({"trcplugin": "p", "trcsha256": "h1", "copied": false})),
            )
            .await
            .unwrap();
        store
            .write(
                &override_path("ns", "host-1", "p"),
                fields(json!({"trcplugin": "p", "trcsha256": "h1", "copied": true, "deployed": true})),
            )
            .await
            .unwrap();

        let loaded = load_host_record(&store, "ns", "host-1", "p")
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.record.copied && loaded.record.deployed);

        let other_host = load_host_record(&store, "ns", "host-2", "p")
            .await
            .unwrap()
            .unwrap();
        assert!(!other_host.record.copied);
    }

    #[tokio::test]
    async fn test_stale_override_is_ignored() {
        let store = MemoryRecordStore::new();
        store
            .write(
                &certify_path("ns", "p"),
                fields(json!({"trcplugin": "p", "trcsha256": "new"})),
            )
            .await
            .unwrap();
        store
            .write(
                &override_path("ns", "h", "p"),
                fields(json!({"trcsha256": "old", "copied": true, "deployed": true, "trcstatus": "notfound"})),
            )
            .await
            .unwrap();

        let loaded = load_host_record(&store, "ns", "h", "p").await.unwrap().unwrap();
        assert!(!loaded.record.deployed);
        assert_eq!(loaded.record.host_status, Some(HostStatus::NotFound));
    }

    #[tokio::test]
    async fn test_agent_deploy_state_is_per_host() {
        let store = MemoryRecordStore::new();
        store
            .write(
                &certify_path("ns", "trcsh"),
                fields(json!({"trcplugin": "trcsh", "trctype": "agent", "trcsha256": "h1", "copied": true, "deployed": true})),
            )
            .await
            .unwrap();
        store
            .write(
                &override_path("ns", "host-1", "trcsh"),
                fields(json!({"trcsha256": "h1", "copied": true, "deployed": true})),
            )
            .await
            .unwrap();

        let deployed_here = load_host_record(&store, "ns", "host-1", "trcsh")
            .await
            .unwrap()
            .unwrap();
        assert!(deployed_here.record.deployed);

        let fresh_host = load_host_record(&store, "ns", "host-2", "trcsh")
            .await
            .unwrap()
            .unwrap();
        assert!(!fresh_host.record.copied);
        assert!(!fresh_host.record.deployed);
    }

    #[tokio::test]
    async fn test_missing_canonical_record() {
        let store = MemoryRecordStore::new();
        assert!(load_host_record(&store, "ns", "h", "p").await.unwrap().is_none());
    }

    #[test]
    fn test_file_connector_rejects_other_schemes() {
        let token = SecretString::new("t");
        assert!(FileStoreConnector.connect("https://vault:8200", &token).is_err());
        assert!(FileStoreConnector.connect("file:///tmp/store", &token).is_ok());
        assert!(FileStoreConnector
            .connect("file:///tmp/store", &SecretString::default())
            .is_err());
    }
}
