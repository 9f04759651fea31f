//! Integration tests for configuration management
//!
//! These tests verify that the Config struct can be properly loaded,
//! validated, and processed with defaults and path expansion.

use carrier_engine::config::Config;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_full_config_loads() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[core]
log_level = "debug"

[deploy]
namespace = "TrcVault"
agent_bin_root = "/home/azuredeploy/bin"
vault_install_root = "/etc/opt/vault"
deploy_group = "azuredeploy"
grant_capabilities = false

[dispatcher]
queue_capacity = 8
completion_timeout_secs = 12

[[environments]]
name = "dev"
vault_address = "file:///srv/records/dev"
certify_address = "file:///srv/records/certify"
token_var = "CARRIER_DEV_TOKEN"
certify_token_var = "CARRIER_CERTIFY_TOKEN"
"#,
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert!(!config.deploy.grant_capabilities);
    assert_eq!(
        config.deploy.vault_plugin_dir(),
        std::path::PathBuf::from("/etc/opt/vault/plugins")
    );
    assert_eq!(config.dispatcher.queue_capacity, 8);
    assert_eq!(config.dispatcher.completion_timeout().as_secs(), 12);

    let env = config.environment("dev").unwrap();
    assert_eq!(env.certify_address, "file:///srv/records/certify");
    assert!(config.environment("prod").is_err());
}

#[test]
fn test_minimal_config_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[core]\nlog_level = \"info\"\n");

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.deploy.namespace, "TrcVault");
    assert_eq!(config.deploy.deploy_group, "azuredeploy");
    assert!(config.deploy.grant_capabilities);
    assert_eq!(config.dispatcher.queue_capacity, 5);
    assert!(config.environments.is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();

    let cases = [
        "[core]\nlog_level = \"loud\"\n",
        "[core]\n[dispatcher]\nqueue_capacity = 0\n",
        "[core]\n[deploy]\nnamespace = \"a/b\"\n",
        r#"
[core]

[[environments]]
name = "dev"
vault_address = "file:///a"
certify_address = "file:///b"
token_var = "A"
certify_token_var = "B"

[[environments]]
name = "dev"
vault_address = "file:///a"
certify_address = "file:///b"
token_var = "A"
certify_token_var = "B"
"#,
        r#"
[core]

[[environments]]
name = "dev"
vault_address = "file:///records"
certify_address = "file:///records"
token_var = "SHARED"
certify_token_var = "SHARED"
"#,
    ];

    for body in cases {
        let path = write_config(&dir, body);
        assert!(Config::load_from_path(&path).is_err(), "accepted: {}", body);
    }
}

