//! Enterprise preset: blocking variables and host settings patching

use std::collections::BTreeMap;
use std::path::Path;

use gwdeploy::app::options::{DeploymentConfig, GatewayType};
use gwdeploy::app::run;
use gwdeploy::audit::Operation;
use gwdeploy::catalog::preset::Preset;

const ENTERPRISE_TEMPLATE: &str = "\
general_settings:
  master_key: os.environ/LITELLM_MASTER_KEY
model_list:
  - model_name: gemini-2.5-flash
    litellm_params:
      model: vertex_ai/gemini-2.5-flash
";

fn source_fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("templates")).unwrap();
    std::fs::write(
        dir.path().join("templates/litellm-enterprise.yaml"),
        ENTERPRISE_TEMPLATE,
    )
    .unwrap();
    dir
}

fn enterprise_config(source: &Path, target: &Path) -> DeploymentConfig {
    DeploymentConfig {
        operation: Operation::Install,
        preset: Preset::Enterprise,
        models: vec!["gemini-2.5-flash".to_string()],
        source_dir: source.to_path_buf(),
        target_dir: target.to_path_buf(),
        gateway_type: GatewayType::Corporate,
        gateway_url: None,
        auth_token: None,
        proxy_url: None,
        proxy_auth: None,
        var_overrides: BTreeMap::new(),
        settings_path: None,
        dry_run: false,
        force: false,
        verbose: false,
    }
}

#[tokio::test]
async fn test_enterprise_patches_host_settings() {
    let source = source_fixture();
    let target_parent = tempfile::tempdir().unwrap();
    let target = target_parent.path().join("gw");
    let settings_dir = tempfile::tempdir().unwrap();
    let settings_path = settings_dir.path().join("settings.json");
    std::fs::write(&settings_path, r#"{"theme": "dark"}"#).unwrap();

    let mut config = enterprise_config(source.path(), &target);
    config.gateway_url = Some("http://gateway.corp:4000".to_string());
    config.auth_token = Some("sk-corp-token".to_string());
    config.settings_path = Some(settings_path.clone());

    run::run(&config).await.unwrap();

    let patched: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&settings_path).unwrap()).unwrap();
    assert_eq!(patched["theme"], "dark");
    assert_eq!(
        patched["env"]["ANTHROPIC_BASE_URL"],
        "http://gateway.corp:4000"
    );
    assert_eq!(patched["env"]["ANTHROPIC_AUTH_TOKEN"], "sk-corp-token");

    // Pre-patch state was preserved next to the settings file
    assert!(settings_path.with_extension("json.bak").exists());
}

#[tokio::test]
async fn test_enterprise_without_gateway_url_fails_pre_gate() {
    std::env::remove_var("ANTHROPIC_BASE_URL");
    let source = source_fixture();
    let target_parent = tempfile::tempdir().unwrap();
    let target = target_parent.path().join("gw");
    let settings_dir = tempfile::tempdir().unwrap();

    // ANTHROPIC_BASE_URL is blocking for this preset and nothing supplies it
    let mut config = enterprise_config(source.path(), &target);
    config.settings_path = Some(settings_dir.path().join("settings.json"));
    let err = run::run(&config).await.unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(!target.exists());
}
