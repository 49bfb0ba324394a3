//! End-to-end install flow

use std::collections::BTreeMap;
use std::path::Path;

use gwdeploy::app::options::{DeploymentConfig, GatewayType};
use gwdeploy::app::run;
use gwdeploy::audit::{AuditLogger, Operation, OperationStatus};
use gwdeploy::catalog::preset::Preset;
use gwdeploy::storage::layout::TargetLayout;

const BASE_TEMPLATE: &str = "\
general_settings:
  master_key: os.environ/LITELLM_MASTER_KEY
model_list:
  - model_name: gemini-2.5-flash
    litellm_params:
      model: vertex_ai/gemini-2.5-flash
";

fn source_fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("templates/models")).unwrap();
    std::fs::write(
        dir.path().join("templates/litellm-basic.yaml"),
        BASE_TEMPLATE,
    )
    .unwrap();
    dir
}

fn install_config(source: &Path, target: &Path, models: &[&str]) -> DeploymentConfig {
    let mut var_overrides = BTreeMap::new();
    var_overrides.insert("VERTEX_PROJECT_ID".to_string(), "test-project".to_string());
    var_overrides.insert("VERTEX_LOCATION".to_string(), "us-central1".to_string());

    DeploymentConfig {
        operation: Operation::Install,
        preset: Preset::Basic,
        models: models.iter().map(|s| s.to_string()).collect(),
        source_dir: source.to_path_buf(),
        target_dir: target.to_path_buf(),
        gateway_type: GatewayType::Litellm,
        gateway_url: None,
        auth_token: None,
        proxy_url: None,
        proxy_auth: None,
        var_overrides,
        settings_path: None,
        dry_run: false,
        force: false,
        verbose: false,
    }
}

#[tokio::test]
async fn test_install_two_models_end_to_end() {
    let source = source_fixture();
    let target_parent = tempfile::tempdir().unwrap();
    let target = target_parent.path().join("gw");

    let config = install_config(
        source.path(),
        &target,
        &["gemini-2.5-flash", "deepseek-r1"],
    );
    run::run(&config).await.unwrap();

    let layout = TargetLayout::new(&target);

    // Exactly the two selected models, in selection order
    let deployed = layout.config_file().read_string().await.unwrap();
    let document: serde_yaml::Value = serde_yaml::from_str(&deployed).unwrap();
    let names = gwdeploy::merge::model_names(&document);
    assert_eq!(names, vec!["gemini-2.5-flash", "deepseek-r1"]);

    // Required variables landed in .env
    let env = layout.env_file().read_string().await.unwrap();
    assert!(env.contains("VERTEX_PROJECT_ID=test-project"));
    assert!(env.contains("VERTEX_LOCATION=us-central1"));
    assert!(env.contains("LITELLM_MASTER_KEY=sk-"));

    assert!(layout.start_script().is_executable().await.unwrap());

    // One success entry in the audit log
    let entries = AuditLogger::new(layout.clone()).read_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, Operation::Install);
    assert_eq!(entries[0].status, OperationStatus::Success);
    assert_eq!(entries[0].models, vec!["gemini-2.5-flash", "deepseek-r1"]);

    // Fresh install has nothing to back up
    assert!(entries[0].backup_created.is_none());
}

#[tokio::test]
async fn test_reinstall_is_idempotent_and_backs_up_first() {
    let source = source_fixture();
    let target_parent = tempfile::tempdir().unwrap();
    let target = target_parent.path().join("gw");

    let mut config = install_config(source.path(), &target, &["gemini-2.5-flash"]);
    run::run(&config).await.unwrap();

    let layout = TargetLayout::new(&target);
    let first = layout.config_file().read_string().await.unwrap();

    // Second run against the existing deployment needs --force
    config.force = true;
    run::run(&config).await.unwrap();

    // Byte-identical merged document
    let second = layout.config_file().read_string().await.unwrap();
    assert_eq!(first, second);

    // The pre-existing state was archived before the overwrite
    let backups = gwdeploy::backup::BackupManager::new(layout.clone())
        .list()
        .await
        .unwrap();
    assert_eq!(backups.len(), 1);
}

#[tokio::test]
async fn test_existing_env_values_survive_reinstall() {
    let source = source_fixture();
    let target_parent = tempfile::tempdir().unwrap();
    let target = target_parent.path().join("gw");

    let mut config = install_config(source.path(), &target, &["gemini-2.5-flash"]);
    run::run(&config).await.unwrap();

    let layout = TargetLayout::new(&target);
    let env = layout.env_file().read_string().await.unwrap();
    let original_key = env
        .lines()
        .find(|l| l.starts_with("LITELLM_MASTER_KEY="))
        .unwrap()
        .to_string();

    config.force = true;
    run::run(&config).await.unwrap();

    // The generated master key was read back from .env, not regenerated
    let env = layout.env_file().read_string().await.unwrap();
    assert!(env.contains(&original_key));
}

#[tokio::test]
async fn test_env_file_lists_every_required_variable() {
    let source = source_fixture();
    let target_parent = tempfile::tempdir().unwrap();
    let target = target_parent.path().join("gw");

    // No overrides at all; unresolved names still land as empty lines
    let mut config = install_config(source.path(), &target, &["gemini-2.5-flash"]);
    config.var_overrides.clear();
    run::run(&config).await.unwrap();

    let layout = TargetLayout::new(&target);
    let env = layout.env_file().read_string().await.unwrap();
    for name in Preset::Basic.required_vars() {
        assert!(
            env.lines().any(|l| l.starts_with(&format!("{}=", name))),
            ".env is missing {}",
            name
        );
    }
}

#[tokio::test]
async fn test_missing_template_fails_before_any_write() {
    let source = tempfile::tempdir().unwrap();
    let target_parent = tempfile::tempdir().unwrap();
    let target = target_parent.path().join("gw");

    let config = install_config(source.path(), &target, &[]);
    let err = run::run(&config).await.unwrap_err();
    assert_eq!(err.exit_code(), 5);
    assert!(!target.exists());
}
