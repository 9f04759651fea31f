//! Shared fixtures for the engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use carrier_engine::deploy::{DeploySettings, PluginDeployer};
use carrier_engine::envelope::{Credentials, EnvConfigEnvelope};
use carrier_engine::platform::HostPlatform;
use carrier_engine::secrets::SecretString;
use carrier_engine::store::{
    certify_path, override_path, Fields, MemoryRecordStore, RecordStore, StoreConnector,
};
use carrier_plugins::registry::ArtifactStore;
use carrier_plugins::verifier::compute_hash;
use sdk::errors::CarrierError;
use sdk::record::CertificationRecord;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const NAMESPACE: &str = "TrcVault";
pub const ENV: &str = "dev";
pub const REGISTRY: &str = "https://registry.example/__imagename__";

/// Connector that hands out one shared in-memory store
pub struct SharedStore(pub Arc<MemoryRecordStore>);

impl StoreConnector for SharedStore {
    fn connect(
        &self,
        address: &str,
        token: &SecretString,
    ) -> Result<Arc<dyn RecordStore>, CarrierError> {
        if token.is_empty() {
            return Err(CarrierError::Config(format!("Empty token for {}", address)));
        }
        Ok(self.0.clone())
    }
}

/// Artifact store serving fixed bytes per plugin name
#[derive(Default)]
pub struct FakeArtifacts {
    images: Mutex<HashMap<String, Vec<u8>>>,
    crashing: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeArtifacts {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn publish(&self, plugin: &str, bytes: &[u8]) {
        self.images
            .lock()
            .unwrap()
            .insert(plugin.to_string(), bytes.to_vec());
    }

    /// Make fetches of `plugin` panic
    pub fn crash_on(&self, plugin: &str) {
        self.crashing.lock().unwrap().push(plugin.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifacts {
    async fn fetch(&self, record: &CertificationRecord) -> Result<Vec<u8>, CarrierError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.crashing.lock().unwrap().contains(&record.plugin_name) {
            panic!("registry client crashed fetching {}", record.plugin_name);
        }
        self.images
            .lock()
            .unwrap()
            .get(&record.plugin_name)
            .cloned()
            .ok_or_else(|| CarrierError::Registry(format!("no image for {}", record.plugin_name)))
    }
}

/// Platform with a fixed hostname that records privileged calls
pub struct FakePlatform {
    hostname: String,
    pub groups: Mutex<Vec<(PathBuf, String)>>,
    pub grants: Mutex<Vec<PathBuf>>,
}

impl FakePlatform {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            groups: Mutex::new(Vec::new()),
            grants: Mutex::new(Vec::new()),
        }
    }

    pub fn granted(&self) -> Vec<PathBuf> {
        self.grants.lock().unwrap().clone()
    }

    pub fn grouped(&self) -> Vec<(PathBuf, String)> {
        self.groups.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostPlatform for FakePlatform {
    fn hostname(&self) -> Result<String, CarrierError> {
        Ok(self.hostname.clone())
    }

    async fn assign_group(&self, path: &Path, group: &str) -> Result<(), CarrierError> {
        self.groups
            .lock()
            .unwrap()
            .push((path.to_path_buf(), group.to_string()));
        Ok(())
    }

    async fn grant_secure_memory_capability(&self, path: &Path) -> Result<(), CarrierError> {
        self.grants.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Deployer wired to in-memory collaborators and a temporary install tree
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<MemoryRecordStore>,
    pub artifacts: Arc<FakeArtifacts>,
    pub platform: Arc<FakePlatform>,
    pub deployer: Arc<PluginDeployer>,
}

impl Fixture {
    pub fn new(hostname: &str) -> Self {
        Self::with_artifacts(hostname, FakeArtifacts::default())
    }

    pub fn with_artifacts(hostname: &str, artifacts: FakeArtifacts) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryRecordStore::new());
        let artifacts = Arc::new(artifacts);
        let platform = Arc::new(FakePlatform::new(hostname));

        let deployer = Arc::new(PluginDeployer::new(
            install_settings(dir.path()),
            Arc::new(SharedStore(store.clone())),
            artifacts.clone(),
            platform.clone(),
        ));

        Self {
            dir,
            store,
            artifacts,
            platform,
            deployer,
        }
    }

    /// Deployer for another host sharing this fixture's store and registry.
    /// It installs under `<dir>/<hostname>`.
    pub fn other_host(&self, hostname: &str) -> PluginDeployer {
        PluginDeployer::new(
            install_settings(&self.dir.path().join(hostname)),
            Arc::new(SharedStore(self.store.clone())),
            self.artifacts.clone(),
            Arc::new(FakePlatform::new(hostname)),
        )
    }

    pub fn vault_path(&self, plugin: &str) -> PathBuf {
        self.dir.path().join("vault").join("plugins").join(plugin)
    }

    pub fn agent_path(&self, plugin: &str) -> PathBuf {
        self.dir.path().join("bin").join(plugin)
    }

    /// Publish `bytes` and write a matching certification record
    pub async fn certify(&self, plugin: &str, plugin_type: &str, bytes: &[u8], instances: &str) {
        self.artifacts.publish(plugin, bytes);
        self.write_record(
            plugin,
            json!({
                "trcplugin": plugin,
                "trctype": plugin_type,
                "acrrepository": REGISTRY,
                "trcsha256": compute_hash(bytes),
                "instances": instances,
            }),
        )
        .await;
    }

    pub async fn write_record(&self, plugin: &str, fields: Value) {
        self.store
            .write(&certify_path(NAMESPACE, plugin), object(fields))
            .await
            .unwrap();
    }

    pub async fn record(&self, plugin: &str) -> Fields {
        self.store
            .read(&certify_path(NAMESPACE, plugin))
            .await
            .unwrap()
            .unwrap_or_default()
    }

    pub async fn host_override(&self, hostname: &str, plugin: &str) -> Option<Fields> {
        self.store
            .read(&override_path(NAMESPACE, hostname, plugin))
            .await
            .unwrap()
    }
}

fn install_settings(root: &Path) -> DeploySettings {
    DeploySettings {
        namespace: NAMESPACE.to_string(),
        agent_bin_root: root.join("bin"),
        vault_plugin_dir: root.join("vault").join("plugins"),
        deploy_group: "azuredeploy".to_string(),
        grant_capabilities: true,
    }
}

pub fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

/// Credentials of the plugin's own environment
pub fn vault_credentials() -> Credentials {
    Credentials::new("mem://vault", SecretString::new("vtoken"))
}

/// Credentials of the certifying environment
pub fn credentials() -> Credentials {
    Credentials::new("mem://certify", SecretString::new("ctoken"))
}

pub fn plugin_envelope(plugin: &str) -> EnvConfigEnvelope {
    EnvConfigEnvelope::for_plugin(ENV, plugin, vault_credentials(), credentials())
}

pub fn bootstrap_envelope() -> EnvConfigEnvelope {
    EnvConfigEnvelope::bootstrap(ENV, vault_credentials(), credentials())
}
