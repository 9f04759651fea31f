//! Certification record data model
//!
//! A certification record is the fleet-wide statement of which artifact hash is
//! approved for a plugin, where it may run and whether this host has copied and
//! deployed it. Records are stored as flat string maps; the serde renames below
//! are the stored field names.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::errors::CarrierError;

/// Plugin name that is always deployed as an agent, whatever its record says.
pub const AGENT_PLUGIN_NAME: &str = "trcsh";

/// Token in an artifact registry URL replaced by the plugin name.
pub const IMAGE_NAME_TOKEN: &str = "__imagename__";

/// Deployment flavour of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Loaded by the secret store from its own plugin directory
    #[default]
    Vault,
    /// Standalone executable placed under the deployment group's bin directory
    Agent,
    /// Service whose code bundle is placed under a configured deploy root
    Trcshservice,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vault => "vault",
            Self::Agent => "agent",
            Self::Trcshservice => "trcshservice",
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent)
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = CarrierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "vault" => Ok(Self::Vault),
            "agent" => Ok(Self::Agent),
            "trcshservice" => Ok(Self::Trcshservice),
            other => Err(CarrierError::Config(format!("Unknown plugin type '{}'", other))),
        }
    }
}

/// Per-host deployment status, written only to per-host override records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// This host's ordinal is in the instance list
    Scheduled,
    /// This host's ordinal is not in the instance list
    #[serde(rename = "notfound")]
    NotFound,
}

/// Ordinals of the instances authorized to run a plugin
///
/// Stored as unquoted comma-separated ordinals (`0,2`). Quoted entries written
/// by older tooling (`"0","2"`) are accepted and normalized.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct InstanceList(Vec<String>);

impl InstanceList {
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(|entry| entry.trim().trim_matches('"').trim())
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    /// Whether the host with `ordinal` may run the plugin
    pub fn contains(&self, ordinal: u32) -> bool {
        self.0
            .iter()
            .any(|entry| entry.parse::<u32>().map(|n| n == ordinal).unwrap_or(false))
    }
}

impl fmt::Display for InstanceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

impl From<String> for InstanceList {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<InstanceList> for String {
    fn from(list: InstanceList) -> Self {
        list.to_string()
    }
}

/// Durable certification record for one plugin
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CertificationRecord {
    #[serde(rename = "trcplugin", default, skip_serializing_if = "String::is_empty")]
    pub plugin_name: String,

    #[serde(rename = "trctype", default, deserialize_with = "de_plugin_type")]
    pub plugin_type: PluginType,

    #[serde(
        rename = "acrrepository",
        alias = "ecrrepository",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub artifact_registry: String,

    #[serde(rename = "trcsha256", default, skip_serializing_if = "String::is_empty")]
    pub certified_hash: String,

    /// Hash of the most recently downloaded bytes. Never persisted.
    #[serde(skip)]
    pub downloaded_hash: Option<String>,

    #[serde(rename = "instances", default, skip_serializing_if = "InstanceList::is_empty")]
    pub instance_list: InstanceList,

    #[serde(default, deserialize_with = "de_flag")]
    pub copied: bool,

    #[serde(default, deserialize_with = "de_flag")]
    pub deployed: bool,

    #[serde(rename = "trcdeployroot", default, skip_serializing_if = "Option::is_none")]
    pub deploy_root: Option<String>,

    #[serde(rename = "trcdeploysubpath", default, skip_serializing_if = "Option::is_none")]
    pub deploy_subpath: Option<String>,

    #[serde(rename = "trccodebundle", default, skip_serializing_if = "Option::is_none")]
    pub code_bundle_name: Option<String>,

    #[serde(rename = "trcpathparam", default, skip_serializing_if = "Option::is_none")]
    pub path_param: Option<String>,

    #[serde(rename = "trcservicename", default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(rename = "trcprojectservice", default, skip_serializing_if = "Option::is_none")]
    pub project_service: Option<String>,

    #[serde(rename = "trcbootstrap", default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_flag: Option<String>,

    #[serde(rename = "newrelic_app_name", default, skip_serializing_if = "Option::is_none")]
    pub new_relic_app_name: Option<String>,

    #[serde(rename = "newrelic_license_key", default, skip_serializing_if = "Option::is_none")]
    pub new_relic_license_key: Option<String>,

    #[serde(rename = "trcstatus", default, skip_serializing_if = "Option::is_none")]
    pub host_status: Option<HostStatus>,
}

impl CertificationRecord {
    /// Parse a record from its stored field map. Unknown fields are ignored.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, CarrierError> {
        Ok(serde_json::from_value(Value::Object(fields.clone()))?)
    }

    /// Field map suitable for a partial update.
    pub fn to_fields(&self) -> Result<Map<String, Value>, CarrierError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(CarrierError::Serialization(format!(
                "record serialized to non-object: {}",
                other
            ))),
        }
    }

    /// Plugin type after the `trcsh` override
    pub fn effective_type(&self) -> PluginType {
        if self.plugin_name == AGENT_PLUGIN_NAME {
            PluginType::Agent
        } else {
            self.plugin_type
        }
    }

    /// Both a certified hash and an artifact location are known
    pub fn is_download_eligible(&self) -> bool {
        !self.certified_hash.is_empty() && !self.artifact_registry.is_empty()
    }

    /// Record carries everything a deployment needs
    pub fn is_certified(&self) -> bool {
        !self.plugin_name.is_empty() && self.is_download_eligible()
    }

    /// Registry URL with the image name substituted
    pub fn registry_url(&self) -> String {
        self.artifact_registry
            .replace(IMAGE_NAME_TOKEN, &self.plugin_name)
    }

    pub fn mark_copied(&mut self) {
        self.copied = true;
    }

    /// Marks the plugin deployed. Deployed implies copied.
    pub fn mark_deployed(&mut self) {
        self.copied = true;
        self.deployed = true;
    }

    pub fn reset_status(&mut self) {
        self.copied = false;
        self.deployed = false;
    }
}

/// Operator and registry input to the certification record builder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(rename = "trcplugin")]
    pub plugin_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<String>,

    /// Operator-declared hash
    #[serde(rename = "trcsha256", default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Hash observed in the artifact registry
    #[serde(rename = "imagesha256", default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,

    #[serde(
        rename = "acrrepository",
        alias = "ecrrepository",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_registry: Option<String>,

    #[serde(rename = "trccodebundle", default, skip_serializing_if = "Option::is_none")]
    pub code_bundle_name: Option<String>,

    #[serde(rename = "trcservicename", default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(rename = "trcprojectservice", default, skip_serializing_if = "Option::is_none")]
    pub project_service: Option<String>,

    #[serde(rename = "trcdeployroot", default, skip_serializing_if = "Option::is_none")]
    pub deploy_root: Option<String>,

    #[serde(rename = "trcdeploysubpath", default, skip_serializing_if = "Option::is_none")]
    pub deploy_subpath: Option<String>,

    #[serde(rename = "trcbootstrap", default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_flag: Option<String>,

    #[serde(rename = "newrelic_app_name", default, skip_serializing_if = "Option::is_none")]
    pub new_relic_app_name: Option<String>,

    #[serde(rename = "newrelic_license_key", default, skip_serializing_if = "Option::is_none")]
    pub new_relic_license_key: Option<String>,
}

impl ToolConfig {
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            ..Default::default()
        }
    }
}

/// Reject plugin names that could escape the record or deploy path namespace
pub fn validate_plugin_name(name: &str) -> Result<(), CarrierError> {
    if name.is_empty() {
        return Err(CarrierError::InvalidPluginName("empty name".to_string()));
    }
    if name.contains('.') || name.contains('/') {
        return Err(CarrierError::InvalidPluginName(name.to_string()));
    }
    Ok(())
}

fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean flag, got {}",
            other
        ))),
    }
}

fn de_plugin_type<'de, D>(deserializer: D) -> Result<PluginType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(serde::de::Error::custom)
}
