//! Certification records
//!
//! [`RecordBuilder`] derives the record written at certification time from
//! operator and registry input. The operations in [`ops`] read and write
//! records in a store.

pub mod ops;

pub use ops::{
    certify_plugin, check_status, define_service, list_certified_plugins, promote_deployed,
    StatusCheck, StatusReport,
};

use sdk::record::{CertificationRecord, InstanceList, PluginType, ToolConfig};

const DEFAULT_INSTANCES: &str = "0";

/// Builds a certification record from a tool config.
///
/// ```
/// use carrier_engine::certify::RecordBuilder;
/// use sdk::record::{PluginType, ToolConfig};
///
/// let mut tool = ToolConfig::new("vault-plugin");
/// tool.sha256 = Some("abc".to_string());
///
/// let record = RecordBuilder::fresh().build(&tool, false, PluginType::Vault, None);
/// assert_eq!(record.certified_hash, "abc");
/// assert_eq!(record.instance_list.to_string(), "0");
/// assert!(!record.copied && !record.deployed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordBuilder {
    base: CertificationRecord,
}

impl RecordBuilder {
    /// Start from an empty record. The result always has `copied` and
    /// `deployed` cleared.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Start from a loaded record, keeping its fields and status flags
    pub fn from_existing(record: CertificationRecord) -> Self {
        Self { base: record }
    }

    pub fn build(
        self,
        tool: &ToolConfig,
        define_service: bool,
        plugin_type: PluginType,
        path_param: Option<&str>,
    ) -> CertificationRecord {
        let mut record = self.base;

        if plugin_type != PluginType::Trcshservice {
            record.plugin_name = tool.plugin_name.clone();
            record.plugin_type = plugin_type;
            record.instance_list = InstanceList::parse(
                tool.instances
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(DEFAULT_INSTANCES),
            );
        }

        if define_service {
            set_if_present(&mut record.code_bundle_name, &tool.code_bundle_name);
            set_if_present(&mut record.service_name, &tool.service_name);
            set_if_present(&mut record.project_service, &tool.project_service);
            set_if_present(&mut record.deploy_root, &tool.deploy_root);
            set_if_present(&mut record.deploy_subpath, &tool.deploy_subpath);
        }

        if let Some(hash) = non_empty(&tool.image_sha256).or_else(|| non_empty(&tool.sha256)) {
            record.certified_hash = hash.to_string();
        }

        if let Some(param) = path_param.filter(|p| !p.is_empty()) {
            record.path_param = Some(param.to_string());
        }

        if plugin_type == PluginType::Vault {
            set_if_present(&mut record.new_relic_app_name, &tool.new_relic_app_name);
            set_if_present(&mut record.new_relic_license_key, &tool.new_relic_license_key);
        }

        if let Some(registry) = non_empty(&tool.artifact_registry) {
            record.artifact_registry = registry.to_string();
        }
        set_if_present(&mut record.bootstrap_flag, &tool.bootstrap_flag);

        record
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn set_if_present(target: &mut Option<String>, source: &Option<String>) {
    if let Some(value) = non_empty(source) {
        *target = Some(value.to_string());
    }
}
