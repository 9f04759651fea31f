//! Store-level certification operations

use carrier_plugins::registry::ArtifactStore;
use carrier_plugins::verifier;
use sdk::errors::CarrierError;
use sdk::record::{validate_plugin_name, CertificationRecord, PluginType, ToolConfig};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use tracing::{debug, info, warn};

use super::RecordBuilder;
use crate::store::{certify_path, plugin_index_path, Fields, RecordStore, OVERRIDES_SEGMENT};

/// Which stage a status check asks about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    Copied,
    Deployed,
}

/// Outcome of a status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReport {
    /// Record says copied with the expected hash
    Copied,
    /// Record says copied and deployed with the expected hash
    Deployed,
    /// The registry holds the expected image but no host has reported it yet
    CertifiedNotCopied,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Copied => "Plugin has been copied",
            Self::Deployed => "Plugin has been copied and deployed",
            Self::CertifiedNotCopied => "Plugin certified but not copied",
        };
        f.write_str(text)
    }
}

/// Names of the plugins with a record in `namespace`
pub async fn list_certified_plugins(
    store: &dyn RecordStore,
    namespace: &str,
) -> Result<Vec<String>, CarrierError> {
    let names = store
        .list(&plugin_index_path(namespace))
        .await?
        .into_iter()
        .filter(|name| name.as_str() != OVERRIDES_SEGMENT)
        .filter(|name| match validate_plugin_name(name) {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %name, error = %e, "Skipping record with invalid plugin name");
                false
            }
        })
        .collect();
    Ok(names)
}

/// Certify a plugin image.
///
/// Without an existing record the tool config is written as a fresh record.
/// Otherwise the image is fetched from the registry and its hash must match
/// the declared hash before the record is updated. A change of certified hash
/// clears the copied and deployed flags.
pub async fn certify_plugin(
    store: &dyn RecordStore,
    artifacts: &dyn ArtifactStore,
    namespace: &str,
    tool: &ToolConfig,
    plugin_type: PluginType,
    define_service: bool,
    path_param: Option<&str>,
) -> Result<CertificationRecord, CarrierError> {
    validate_plugin_name(&tool.plugin_name)?;
    let path = certify_path(namespace, &tool.plugin_name);

    let Some(fields) = store.read(&path).await? else {
        let record =
            RecordBuilder::fresh().build(tool, define_service, plugin_type, path_param);
        store.write(&path, record.to_fields()?).await?;
        info!(plugin = %record.plugin_name, hash = %record.certified_hash, "Certification initialized");
        return Ok(record);
    };

    let existing = CertificationRecord::from_fields(&fields)?;

    let mut probe = existing.clone();
    probe.plugin_name = tool.plugin_name.clone();
    if let Some(registry) = tool.artifact_registry.as_deref().filter(|r| !r.is_empty()) {
        probe.artifact_registry = registry.to_string();
    }
    let bytes = artifacts.fetch(&probe).await?;
    let image_hash = verifier::compute_hash(&bytes);

    if let Some(declared) = tool.sha256.as_deref().filter(|s| !s.is_empty()) {
        if !verifier::hashes_match(&image_hash, declared) {
            return Err(CarrierError::IntegrityMismatch {
                plugin: tool.plugin_name.clone(),
                expected: declared.to_string(),
                actual: image_hash,
            });
        }
    }

    let mut observed = tool.clone();
    observed.image_sha256 = Some(image_hash);

    let previous_hash = existing.certified_hash.clone();
    let mut record = RecordBuilder::from_existing(existing).build(
        &observed,
        define_service,
        plugin_type,
        path_param,
    );
    if record.certified_hash != previous_hash {
        record.reset_status();
    }

    store.write(&path, record.to_fields()?).await?;
    info!(plugin = %record.plugin_name, hash = %record.certified_hash, "Plugin certified");
    Ok(record)
}

/// Record the service definition for a plugin
pub async fn define_service(
    store: &dyn RecordStore,
    namespace: &str,
    tool: &ToolConfig,
    plugin_type: PluginType,
    path_param: Option<&str>,
) -> Result<CertificationRecord, CarrierError> {
    validate_plugin_name(&tool.plugin_name)?;
    let path = certify_path(namespace, &tool.plugin_name);

    let builder = match store.read(&path).await? {
        Some(fields) => RecordBuilder::from_existing(CertificationRecord::from_fields(&fields)?),
        None => RecordBuilder::fresh(),
    };
    let mut record = builder.build(tool, true, plugin_type, path_param);
    if record.plugin_name.is_empty() {
        record.plugin_name = tool.plugin_name.clone();
        record.plugin_type = plugin_type;
    }

    store.write(&path, record.to_fields()?).await?;
    info!(plugin = %record.plugin_name, plugin_type = %plugin_type, "Service defined");
    Ok(record)
}

/// Check whether a plugin has been copied or deployed with the expected hash.
///
/// `expected` defaults to the record's certified hash.
pub async fn check_status(
    store: &dyn RecordStore,
    artifacts: &dyn ArtifactStore,
    namespace: &str,
    plugin: &str,
    expected: Option<&str>,
    check: StatusCheck,
) -> Result<StatusReport, CarrierError> {
    validate_plugin_name(plugin)?;
    let fields = store
        .read(&certify_path(namespace, plugin))
        .await?
        .ok_or_else(|| CarrierError::NotDeployable(format!("{} is not certified", plugin)))?;
    let record = CertificationRecord::from_fields(&fields)?;

    let expected = expected
        .filter(|s| !s.is_empty())
        .unwrap_or(record.certified_hash.as_str())
        .to_string();

    let hash_current = verifier::hashes_match(&record.certified_hash, &expected);
    match check {
        StatusCheck::Deployed if hash_current && record.copied && record.deployed => {
            return Ok(StatusReport::Deployed)
        }
        StatusCheck::Copied if hash_current && record.copied => return Ok(StatusReport::Copied),
        _ => {}
    }

    debug!(plugin, "Record does not confirm the expected hash, checking registry");
    let bytes = artifacts.fetch(&record).await?;
    if verifier::hashes_match(&verifier::compute_hash(&bytes), &expected) {
        Ok(StatusReport::CertifiedNotCopied)
    } else {
        Err(CarrierError::NotDeployable(format!(
            "{} is not certified with hash {}",
            plugin, expected
        )))
    }
}

/// Mark copied non-agent plugins as deployed.
///
/// Returns the names that were promoted. Absent or not-yet-copied records
/// are skipped.
pub async fn promote_deployed(
    store: &dyn RecordStore,
    namespace: &str,
    plugins: &[String],
) -> Result<Vec<String>, CarrierError> {
    let mut promoted = Vec::new();

    for plugin in plugins {
        validate_plugin_name(plugin)?;
        let path = certify_path(namespace, plugin);
        let Some(fields) = store.read(&path).await? else {
            info!(plugin = %plugin, "No certification record, skipping promotion");
            continue;
        };
        let record = CertificationRecord::from_fields(&fields)?;

        if !record.copied {
            info!(plugin = %plugin, "Not copied yet, skipping promotion");
            continue;
        }
        if record.deployed {
            debug!(plugin = %plugin, "Already deployed");
            continue;
        }

        store.write(&path, deployed_fields()).await?;
        info!(plugin = %plugin, hash = %record.certified_hash, "Plugin promoted to deployed");
        promoted.push(plugin.clone());
    }

    Ok(promoted)
}

fn deployed_fields() -> Fields {
    let mut fields = Fields::new();
    fields.insert("copied".to_string(), json!(true));
    fields.insert("deployed".to_string(), json!(true));
    fields
}
