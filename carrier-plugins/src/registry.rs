//! Artifact registry client: fetches certified plugin images

use async_trait::async_trait;
use sdk::errors::CarrierError;
use sdk::record::CertificationRecord;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("carrier-plugins/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Source of plugin artifact bytes.
///
/// Implementations only fetch. Callers always re-hash what comes back before
/// trusting it.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn fetch(&self, record: &CertificationRecord) -> Result<Vec<u8>, CarrierError>;
}

/// Registry client that downloads the artifact over HTTP(S).
///
/// The record's registry URL may contain `__imagename__`, which is replaced
/// by the plugin name.
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    client: reqwest::Client,
}

impl HttpArtifactStore {
    pub fn new() -> Result<Self, CarrierError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, CarrierError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CarrierError::Registry(format!("Failed to build client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn fetch(&self, record: &CertificationRecord) -> Result<Vec<u8>, CarrierError> {
        if record.artifact_registry.is_empty() {
            return Err(CarrierError::Registry(format!(
                "No artifact registry recorded for {}",
                record.plugin_name
            )));
        }

        let url = record.registry_url();
        debug!(plugin = %record.plugin_name, %url, "Fetching artifact");

        let bytes = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CarrierError::Registry(format!("Request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| CarrierError::Registry(format!("Failed to download artifact: {}", e)))?
            .bytes()
            .await
            .map_err(|e| CarrierError::Registry(format!("Failed to read artifact body: {}", e)))?;

        Ok(bytes.to_vec())
    }
}
