//! Integration tests for certification against a file-backed record store
//!
//! Registry downloads are served by a mock HTTP server.

use carrier_engine::certify::{
    certify_plugin, check_status, define_service, list_certified_plugins, promote_deployed,
    StatusCheck, StatusReport,
};
use carrier_engine::secrets::SecretString;
use carrier_engine::store::{certify_path, FileStoreConnector, RecordStore, StoreConnector};
use carrier_plugins::verifier::compute_hash;
use carrier_plugins::HttpArtifactStore;
use sdk::errors::CarrierError;
use sdk::record::{PluginType, ToolConfig};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const NAMESPACE: &str = "TrcVault";

fn open_store(dir: &TempDir) -> Arc<dyn RecordStore> {
    FileStoreConnector
        .connect(
            &format!("file://{}", dir.path().display()),
            &SecretString::new("ctoken"),
        )
        .unwrap()
}

fn tool(server: &MockServer, sha256: &str) -> ToolConfig {
    ToolConfig {
        plugin_name: "vault-plugin".to_string(),
        instances: Some("0,1".to_string()),
        sha256: Some(sha256.to_string()),
        artifact_registry: Some(format!("{}/images/__imagename__", server.uri())),
        ..Default::default()
    }
}

async fn serve_image(server: &MockServer, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path("/images/vault-plugin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_certify_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let server = MockServer::start().await;
    serve_image(&server, b"image-v1").await;
    let artifacts = HttpArtifactStore::new().unwrap();
    let hash = compute_hash(b"image-v1");

    // First certification initializes the record
    let record = certify_plugin(
        store.as_ref(),
        &artifacts,
        NAMESPACE,
        &tool(&server, &hash),
        PluginType::Vault,
        false,
        None,
    )
    .await
    .unwrap();
    assert_eq!(record.certified_hash, hash);
    assert!(!record.copied && !record.deployed);
    assert!(dir
        .path()
        .join("super-secrets/Index/TrcVault/trcplugin/vault-plugin/Certify.json")
        .exists());

    // Second certification checks the registry image
    let record = certify_plugin(
        store.as_ref(),
        &artifacts,
        NAMESPACE,
        &tool(&server, &hash),
        PluginType::Vault,
        false,
        None,
    )
    .await
    .unwrap();
    assert_eq!(record.certified_hash, hash);

    let report = check_status(
        store.as_ref(),
        &artifacts,
        NAMESPACE,
        "vault-plugin",
        None,
        StatusCheck::Copied,
    )
    .await
    .unwrap();
    assert_eq!(report, StatusReport::CertifiedNotCopied);

    // A host reports the copy, then the plugin is promoted
    let mut copied = serde_json::Map::new();
    copied.insert("copied".to_string(), json!(true));
    store
        .write(&certify_path(NAMESPACE, "vault-plugin"), copied)
        .await
        .unwrap();

    let promoted = promote_deployed(store.as_ref(), NAMESPACE, &["vault-plugin".to_string()])
        .await
        .unwrap();
    assert_eq!(promoted, vec!["vault-plugin"]);

    let report = check_status(
        store.as_ref(),
        &artifacts,
        NAMESPACE,
        "vault-plugin",
        Some(&hash),
        StatusCheck::Deployed,
    )
    .await
    .unwrap();
    assert_eq!(report, StatusReport::Deployed);

    assert_eq!(
        list_certified_plugins(store.as_ref(), NAMESPACE).await.unwrap(),
        vec!["vault-plugin"]
    );
}

#[tokio::test]
async fn test_recertify_with_wrong_hash_is_refused() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let server = MockServer::start().await;
    serve_image(&server, b"image-v1").await;
    let artifacts = HttpArtifactStore::new().unwrap();

    certify_plugin(
        store.as_ref(),
        &artifacts,
        NAMESPACE,
        &tool(&server, "declared-before-build"),
        PluginType::Vault,
        false,
        None,
    )
    .await
    .unwrap();

    let result = certify_plugin(
        store.as_ref(),
        &artifacts,
        NAMESPACE,
        &tool(&server, "not-the-image-hash"),
        PluginType::Vault,
        false,
        None,
    )
    .await;
    assert!(matches!(result, Err(CarrierError::IntegrityMismatch { .. })));

    let stored = store
        .read(&certify_path(NAMESPACE, "vault-plugin"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get("trcsha256"), Some(&json!("declared-before-build")));
}

#[tokio::test]
async fn test_define_service_records_bundle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let server = MockServer::start().await;

    let mut input = tool(&server, "abc");
    input.plugin_name = "web-service".to_string();
    input.code_bundle_name = Some("app.war".to_string());
    input.deploy_root = Some("/opt/{{.trcpathparam}}".to_string());
    input.deploy_subpath = Some("webapps".to_string());
    input.service_name = Some("web".to_string());

    let record = define_service(
        store.as_ref(),
        NAMESPACE,
        &input,
        PluginType::Trcshservice,
        Some("east"),
    )
    .await
    .unwrap();

    assert_eq!(record.plugin_name, "web-service");
    assert_eq!(record.plugin_type, PluginType::Trcshservice);
    assert_eq!(record.code_bundle_name.as_deref(), Some("app.war"));
    assert_eq!(record.path_param.as_deref(), Some("east"));

    let stored = store
        .read(&certify_path(NAMESPACE, "web-service"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get("trcdeploysubpath"), Some(&json!("webapps")));
    assert_eq!(stored.get("trcservicename"), Some(&json!("web")));
}

#[test]
fn test_connector_rejects_unknown_scheme() {
    let result = FileStoreConnector.connect("https://vault:8200", &SecretString::new("t"));
    assert!(result.is_err());

    let result = FileStoreConnector.connect("file:///tmp/records", &SecretString::default());
    assert!(result.is_err());
}
