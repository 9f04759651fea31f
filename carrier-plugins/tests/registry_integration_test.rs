//! Integration tests for the HTTP artifact registry client

use carrier_plugins::registry::{ArtifactStore, HttpArtifactStore};
use carrier_plugins::verifier;
use sdk::errors::CarrierError;
use sdk::record::CertificationRecord;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn record_for(server: &MockServer, plugin: &str) -> CertificationRecord {
    CertificationRecord {
        plugin_name: plugin.to_string(),
        artifact_registry: format!("{}/images/__imagename__", server.uri()),
        certified_hash: verifier::compute_hash(b"plugin-bytes"),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_fetch_substitutes_image_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/vault-plugin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"plugin-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpArtifactStore::new().unwrap();
    let record = record_for(&server, "vault-plugin");
    let bytes = store.fetch(&record).await.unwrap();

    assert_eq!(bytes, b"plugin-bytes");
    assert!(verifier::verify_hash("vault-plugin", &bytes, &record.certified_hash).is_ok());
}

#[tokio::test]
async fn test_fetch_maps_http_errors_to_registry_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = HttpArtifactStore::new().unwrap();
    let result = store.fetch(&record_for(&server, "missing")).await;

    assert!(matches!(result, Err(CarrierError::Registry(_))));
}

#[tokio::test]
async fn test_fetch_without_registry_fails_fast() {
    let store = HttpArtifactStore::new().unwrap();
    let record = CertificationRecord {
        plugin_name: "p".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        store.fetch(&record).await,
        Err(CarrierError::Registry(_))
    ));
}
