//! Plugin deployment state machine
//!
//! One call to [`PluginDeployer::deploy`] takes a plugin from "certified in the
//! record store" to "verified executable on this host, recorded as copied":
//!
//! 1. resolve the plugin and the certifying store from the envelope
//! 2. load the record as seen from this host
//! 3. check instance affinity
//! 4. stop if the record already says deployed
//! 5. hash whatever is on disk at the deploy path
//! 6. download and verify when the disk copy is missing or stale
//! 7. record the new status
//!
//! Steps 2 through 4 end quietly with a [`DeployOutcome`]. An integrity
//! mismatch in step 6 is an error and nothing is written.

use carrier_plugins::installer;
use carrier_plugins::registry::ArtifactStore;
use carrier_plugins::verifier;
use chrono::Local;
use sdk::errors::CarrierError;
use sdk::record::{CertificationRecord, HostStatus, PluginType, ToolConfig};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::certify::RecordBuilder;
use crate::config::DeployConfig;
use crate::envelope::{DeployOutcome, EnvConfigEnvelope};
use crate::platform::{host_ordinal, HostPlatform};
use crate::store::{
    certify_path, load_host_record, override_path, Fields, RecordStore, StoreConnector,
};

/// Where and how plugins are installed on this host
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub namespace: String,
    pub agent_bin_root: PathBuf,
    pub vault_plugin_dir: PathBuf,
    pub deploy_group: String,
    pub grant_capabilities: bool,
}

impl From<&DeployConfig> for DeploySettings {
    fn from(config: &DeployConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            agent_bin_root: config.agent_bin_root.clone(),
            vault_plugin_dir: config.vault_plugin_dir(),
            deploy_group: config.deploy_group.clone(),
            grant_capabilities: config.grant_capabilities,
        }
    }
}

/// Resolved install location for one plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    /// File the artifact is written to
    pub path: PathBuf,
    /// Root directory of a code bundle deployment
    pub bundle_root: Option<PathBuf>,
}

pub struct PluginDeployer {
    settings: DeploySettings,
    stores: Arc<dyn StoreConnector>,
    artifacts: Arc<dyn ArtifactStore>,
    platform: Arc<dyn HostPlatform>,
}

impl PluginDeployer {
    pub fn new(
        settings: DeploySettings,
        stores: Arc<dyn StoreConnector>,
        artifacts: Arc<dyn ArtifactStore>,
        platform: Arc<dyn HostPlatform>,
    ) -> Self {
        Self {
            settings,
            stores,
            artifacts,
            platform,
        }
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    /// Open the certifying store named by the envelope
    pub fn certify_store(
        &self,
        envelope: &EnvConfigEnvelope,
    ) -> Result<Arc<dyn RecordStore>, CarrierError> {
        self.stores
            .connect(&envelope.certify.address, &envelope.certify.token)
    }

    /// Run one deployment attempt for the envelope's plugin
    pub async fn deploy(&self, envelope: &EnvConfigEnvelope) -> Result<DeployOutcome, CarrierError> {
        let plugin = envelope
            .plugin_name
            .as_deref()
            .ok_or_else(|| CarrierError::Config("Envelope names no plugin".to_string()))?;
        envelope.validate()?;

        let store = self.certify_store(envelope)?;
        let hostname = self.platform.hostname()?;
        let namespace = self.settings.namespace.as_str();

        let Some(loaded) = load_host_record(store.as_ref(), namespace, &hostname, plugin).await?
        else {
            info!(plugin, "No certification record, nothing to deploy");
            return Ok(DeployOutcome::NotCertified);
        };
        let mut record = loaded.record;
        if !record.is_certified() {
            info!(plugin, "Certification record incomplete, nothing to deploy");
            return Ok(DeployOutcome::NotCertified);
        }
        let plugin_type = record.effective_type();

        let ordinal = host_ordinal(&hostname);
        if !record.instance_list.contains(ordinal) {
            info!(
                plugin,
                ordinal,
                instances = %record.instance_list,
                "Plugin not scheduled on this instance"
            );
            self.write_host_status(store.as_ref(), &hostname, plugin, HostStatus::NotFound)
                .await?;
            return Ok(DeployOutcome::NotScheduled);
        }
        if record.host_status == Some(HostStatus::NotFound) {
            self.write_host_status(store.as_ref(), &hostname, plugin, HostStatus::Scheduled)
                .await?;
        }

        if record.deployed {
            debug!(plugin, "Already deployed");
            return Ok(DeployOutcome::AlreadyDeployed {
                hash: record.certified_hash,
            });
        }

        let target = self.deploy_target(&record)?;
        let on_disk = verifier::hash_file(&target.path).await?;
        let current_on_disk = on_disk
            .as_deref()
            .map(|hash| verifier::hashes_match(hash, &record.certified_hash))
            .unwrap_or(false);

        if current_on_disk {
            debug!(plugin, path = %target.path.display(), "Artifact on disk matches certified hash");
        } else {
            self.download_and_install(&mut record, &target, plugin_type)
                .await?;
        }

        if current_on_disk && record.copied {
            debug!(plugin, "Status unchanged, skipping record update");
            return Ok(DeployOutcome::Verified {
                hash: record.certified_hash,
            });
        }

        self.record_copied(store.as_ref(), &hostname, &record, plugin_type)
            .await?;

        let hash = record.certified_hash;
        if current_on_disk {
            Ok(DeployOutcome::Verified { hash })
        } else {
            Ok(DeployOutcome::Installed { hash })
        }
    }

    /// Install location for a record on this host
    pub fn deploy_target(&self, record: &CertificationRecord) -> Result<DeployTarget, CarrierError> {
        let plugin = &record.plugin_name;

        match record.effective_type() {
            PluginType::Agent => Ok(DeployTarget {
                path: self.settings.agent_bin_root.join(plugin),
                bundle_root: None,
            }),
            PluginType::Trcshservice => {
                match (record.deploy_root.as_deref(), record.code_bundle_name.as_deref()) {
                    (Some(root), Some(bundle)) if !root.is_empty() && !bundle.is_empty() => {
                        if Path::new(bundle).file_name().and_then(|n| n.to_str()) != Some(bundle) {
                            return Err(CarrierError::Config(format!(
                                "Code bundle name '{}' is not a file name",
                                bundle
                            )));
                        }
                        let bundle_root = installer::resolve_bundle_root(
                            root,
                            record.deploy_subpath.as_deref(),
                            record.path_param.as_deref(),
                        )?;
                        Ok(DeployTarget {
                            path: bundle_root.join(bundle),
                            bundle_root: Some(bundle_root),
                        })
                    }
                    _ => Ok(self.vault_target(plugin)),
                }
            }
            PluginType::Vault => Ok(self.vault_target(plugin)),
        }
    }

    fn vault_target(&self, plugin: &str) -> DeployTarget {
        DeployTarget {
            path: self.settings.vault_plugin_dir.join(plugin),
            bundle_root: None,
        }
    }

    async fn download_and_install(
        &self,
        record: &mut CertificationRecord,
        target: &DeployTarget,
        plugin_type: PluginType,
    ) -> Result<(), CarrierError> {
        let plugin = record.plugin_name.clone();
        info!(plugin = %plugin, path = %target.path.display(), "Downloading artifact");

        let bytes = self.artifacts.fetch(record).await?;
        let actual = verifier::verify_hash(&plugin, &bytes, &record.certified_hash)?;
        record.downloaded_hash = Some(actual);

        if let Some(root) = &target.bundle_root {
            installer::create_private_dir(root).await?;
            if let Some(bundle) = record.code_bundle_name.as_deref() {
                installer::archive_exploded_war(root, bundle, Local::now()).await?;
            }
        }

        installer::place_artifact(&target.path, &bytes).await?;
        self.secure_artifact(&target.path, plugin_type).await;
        Ok(())
    }

    /// Ownership and capability problems leave a working but degraded install
    async fn secure_artifact(&self, path: &Path, plugin_type: PluginType) {
        if plugin_type.is_agent() {
            if let Err(e) = self
                .platform
                .assign_group(path, &self.settings.deploy_group)
                .await
            {
                warn!(path = %path.display(), error = %e, "Could not assign deployment group");
            }
        }

        if self.settings.grant_capabilities && plugin_type != PluginType::Trcshservice {
            if let Err(e) = self.platform.grant_secure_memory_capability(path).await {
                warn!(path = %path.display(), error = %e, "Could not grant memory-lock capability");
            }
        }
    }

    async fn record_copied(
        &self,
        store: &dyn RecordStore,
        hostname: &str,
        record: &CertificationRecord,
        plugin_type: PluginType,
    ) -> Result<(), CarrierError> {
        let namespace = self.settings.namespace.as_str();
        let plugin = record.plugin_name.as_str();

        let mut updated = RecordBuilder::from_existing(record.clone()).build(
            &observed_tool(record),
            false,
            plugin_type,
            None,
        );
        updated.mark_copied();
        if plugin_type.is_agent() {
            updated.mark_deployed();
        }
        updated.host_status = None;

        store
            .write(&certify_path(namespace, plugin), updated.to_fields()?)
            .await?;

        if plugin_type.is_agent() {
            let mut host = Fields::new();
            host.insert("trcplugin".to_string(), json!(plugin));
            host.insert("trcsha256".to_string(), json!(updated.certified_hash));
            host.insert("copied".to_string(), json!(true));
            host.insert("deployed".to_string(), json!(true));
            host.insert("trcstatus".to_string(), json!(HostStatus::Scheduled));
            store
                .write(&override_path(namespace, hostname, plugin), host)
                .await?;
        }

        info!(
            plugin,
            hash = %updated.certified_hash,
            deployed = plugin_type.is_agent(),
            "Certification record updated"
        );
        Ok(())
    }

    async fn write_host_status(
        &self,
        store: &dyn RecordStore,
        hostname: &str,
        plugin: &str,
        status: HostStatus,
    ) -> Result<(), CarrierError> {
        let mut fields = Fields::new();
        fields.insert("trcplugin".to_string(), json!(plugin));
        fields.insert("trcstatus".to_string(), json!(status));
        store
            .write(
                &override_path(&self.settings.namespace, hostname, plugin),
                fields,
            )
            .await
    }
}

/// Tool config describing what this host observed for `record`
fn observed_tool(record: &CertificationRecord) -> ToolConfig {
    ToolConfig {
        plugin_name: record.plugin_name.clone(),
        instances: Some(record.instance_list.to_string()),
        sha256: Some(record.certified_hash.clone()),
        image_sha256: record.downloaded_hash.clone(),
        ..Default::default()
    }
}
