//! Post-deployment gate
//!
//! Runs after the file deployer (or against a rollback staging directory).
//! Any FAIL here sends the orchestrator down the rollback path.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use crate::filesys::file::File;
use crate::merge;
use crate::storage::layout::TargetLayout;
use crate::validate::{GateReport, ValidationResult};

/// Relative path of the external validator within the deployed assets
const EXTERNAL_VALIDATOR: &str = "scripts/validate-config.py";

/// Inputs to the post-deployment gate
#[derive(Debug)]
pub struct PostCheckContext<'a> {
    /// Directory under inspection: the live target, or a staging
    /// extraction during rollback
    pub root: &'a Path,

    /// Files the deployer planned to write, absolute. `None` during
    /// rollback, when no plan exists.
    pub planned_files: Option<&'a [PathBuf]>,

    /// Gateway endpoint to probe, if one was supplied
    pub gateway_url: Option<&'a str>,
}

/// Run every post-deployment check in order
pub async fn run_post_checks(ctx: &PostCheckContext<'_>) -> GateReport {
    let layout = TargetLayout::new(ctx.root);
    let mut report = GateReport::default();

    report.push(check_file_count(ctx).await);
    report.push(check_config_reparse(&layout).await);
    report.push(check_external_validator(ctx.root, &layout).await);
    report.push(check_env_permissions(&layout).await);
    report.push(check_scripts_executable(&layout).await);
    report.push(check_gateway_reachable(ctx.gateway_url).await);

    report
}

async fn check_file_count(ctx: &PostCheckContext<'_>) -> ValidationResult {
    let started = Instant::now();
    let Some(planned) = ctx.planned_files else {
        return ValidationResult::skip("file_count", "no deployment plan to compare against")
            .timed(started);
    };

    let mut missing = Vec::new();
    for path in planned {
        if tokio::fs::metadata(path).await.is_err() {
            missing.push(path.display().to_string());
        }
    }

    if missing.is_empty() {
        ValidationResult::pass(
            "file_count",
            format!("all {} planned files are present", planned.len()),
        )
        .timed(started)
    } else {
        ValidationResult::fail(
            "file_count",
            format!("{} of {} planned files missing", missing.len(), planned.len()),
        )
        .with_details(json!({ "missing": missing }))
        .timed(started)
    }
}

async fn check_config_reparse(layout: &TargetLayout) -> ValidationResult {
    let started = Instant::now();
    let config_file = layout.config_file();
    let contents = match config_file.read_string().await {
        Ok(contents) => contents,
        Err(e) => {
            return ValidationResult::fail(
                "config_reparse",
                format!("cannot read deployed config: {}", e),
            )
            .timed(started)
        }
    };

    match serde_yaml::from_str::<serde_yaml::Value>(&contents) {
        Ok(document) => {
            let names = merge::model_names(&document);
            if names.is_empty() {
                ValidationResult::fail("config_reparse", "deployed config has no model_list entries")
                    .timed(started)
            } else {
                ValidationResult::pass(
                    "config_reparse",
                    format!("config re-parses with {} model(s)", names.len()),
                )
                .with_details(json!({ "models": names }))
                .timed(started)
            }
        }
        Err(e) => ValidationResult::fail(
            "config_reparse",
            format!("deployed config is not valid YAML: {}", e),
        )
        .timed(started),
    }
}

/// Structural/semantic validation is delegated to the validator script
/// shipped with the bundle; this tool never reimplements it.
async fn check_external_validator(root: &Path, layout: &TargetLayout) -> ValidationResult {
    let started = Instant::now();
    let script = root.join(EXTERNAL_VALIDATOR);
    if !script.is_file() {
        return ValidationResult::skip(
            "external_validator",
            format!("{} not present in deployment", EXTERNAL_VALIDATOR),
        )
        .timed(started);
    }

    let output = Command::new("python3")
        .arg(&script)
        .arg(layout.config_file().path())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            ValidationResult::pass("external_validator", "external validator passed").timed(started)
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let diagnostics = if stderr.trim().is_empty() { stdout } else { stderr };
            ValidationResult::fail(
                "external_validator",
                format!(
                    "external validator rejected the config: {}",
                    diagnostics.trim().lines().last().unwrap_or("no diagnostics")
                ),
            )
            .with_details(json!({ "diagnostics": diagnostics.trim() }))
            .timed(started)
        }
        Err(e) => {
            debug!("external validator unavailable: {}", e);
            ValidationResult::skip(
                "external_validator",
                format!("python3 unavailable, validator skipped: {}", e),
            )
            .timed(started)
        }
    }
}

async fn check_env_permissions(layout: &TargetLayout) -> ValidationResult {
    let started = Instant::now();
    let env_file = layout.env_file();
    if !env_file.exists().await {
        return ValidationResult::fail("env_permissions", ".env file is missing").timed(started);
    }

    match env_file.mode().await {
        Ok(Some(mode)) if mode == 0o600 => {
            ValidationResult::pass("env_permissions", ".env has owner-only permissions")
                .timed(started)
        }
        Ok(Some(mode)) => ValidationResult::fail(
            "env_permissions",
            format!(".env permissions are {:o}, expected 600", mode),
        )
        .timed(started),
        Ok(None) => ValidationResult::skip(
            "env_permissions",
            "permission bits not applicable on this platform",
        )
        .timed(started),
        Err(e) => {
            ValidationResult::fail("env_permissions", format!("cannot stat .env: {}", e))
                .timed(started)
        }
    }
}

async fn check_scripts_executable(layout: &TargetLayout) -> ValidationResult {
    let started = Instant::now();
    let script = layout.start_script();
    if !script.exists().await {
        return ValidationResult::fail("scripts_executable", "start-gateway.sh is missing")
            .timed(started);
    }
    match script.is_executable().await {
        Ok(true) => ValidationResult::pass("scripts_executable", "generated scripts are executable")
            .timed(started),
        Ok(false) => ValidationResult::fail(
            "scripts_executable",
            "start-gateway.sh is not executable",
        )
        .timed(started),
        Err(e) => ValidationResult::fail(
            "scripts_executable",
            format!("cannot stat start-gateway.sh: {}", e),
        )
        .timed(started),
    }
}

/// Network may be unavailable; reachability is recorded but never fatal
async fn check_gateway_reachable(gateway_url: Option<&str>) -> ValidationResult {
    let started = Instant::now();
    let Some(url) = gateway_url else {
        return ValidationResult::skip("gateway_reachable", "no gateway URL supplied")
            .timed(started);
    };

    let probe_url = format!("{}/health", url.trim_end_matches('/'));
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            return ValidationResult::warn(
                "gateway_reachable",
                format!("probe client could not be built: {}", e),
            )
            .timed(started)
        }
    };

    match client.get(&probe_url).send().await {
        Ok(response) if response.status().is_success() => ValidationResult::pass(
            "gateway_reachable",
            format!("{} answered {}", probe_url, response.status()),
        )
        .timed(started),
        Ok(response) => ValidationResult::warn(
            "gateway_reachable",
            format!("{} answered {}", probe_url, response.status()),
        )
        .timed(started),
        Err(e) => ValidationResult::warn(
            "gateway_reachable",
            format!("gateway not reachable at {}: {}", probe_url, e),
        )
        .timed(started),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::CheckStatus;

    async fn deployed_fixture() -> (tempfile::TempDir, TargetLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = TargetLayout::new(dir.path());
        layout.config_dir().create().await.unwrap();
        layout
            .config_file()
            .write_atomic(
                b"model_list:\n  - model_name: gemini-2.5-flash\n    litellm_params:\n      model: vertex_ai/gemini-2.5-flash\n",
            )
            .await
            .unwrap();
        layout.env_file().write_atomic(b"A=1\n").await.unwrap();
        layout.env_file().set_mode(0o600).await.unwrap();
        layout
            .start_script()
            .write_atomic(b"#!/bin/sh\nexit 0\n")
            .await
            .unwrap();
        layout.start_script().set_mode(0o755).await.unwrap();
        (dir, layout)
    }

    #[tokio::test]
    async fn test_post_gate_passes_on_good_deployment() {
        let (dir, _layout) = deployed_fixture().await;
        let ctx = PostCheckContext {
            root: dir.path(),
            planned_files: None,
            gateway_url: None,
        };
        let report = run_post_checks(&ctx).await;
        assert!(!report.has_failures(), "{}", report.failure_summary());
    }

    #[tokio::test]
    async fn test_post_gate_fails_on_missing_env() {
        let (dir, layout) = deployed_fixture().await;
        layout.env_file().delete().await.unwrap();

        let ctx = PostCheckContext {
            root: dir.path(),
            planned_files: None,
            gateway_url: None,
        };
        let report = run_post_checks(&ctx).await;
        assert!(report.has_failures());
        assert!(report
            .failures()
            .iter()
            .any(|r| r.check_name == "env_permissions"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_post_gate_fails_on_loose_env_permissions() {
        let (dir, layout) = deployed_fixture().await;
        layout.env_file().set_mode(0o644).await.unwrap();

        let ctx = PostCheckContext {
            root: dir.path(),
            planned_files: None,
            gateway_url: None,
        };
        let report = run_post_checks(&ctx).await;
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_post_gate_fails_on_empty_model_list() {
        let (dir, layout) = deployed_fixture().await;
        layout
            .config_file()
            .write_atomic(b"model_list: []\n")
            .await
            .unwrap();

        let ctx = PostCheckContext {
            root: dir.path(),
            planned_files: None,
            gateway_url: None,
        };
        let report = run_post_checks(&ctx).await;
        assert!(report
            .failures()
            .iter()
            .any(|r| r.check_name == "config_reparse"));
    }

    #[tokio::test]
    async fn test_file_count_detects_missing_planned_file() {
        let (dir, _layout) = deployed_fixture().await;
        let planned = vec![dir.path().join("config/litellm.yaml"), dir.path().join("gone.txt")];
        let ctx = PostCheckContext {
            root: dir.path(),
            planned_files: Some(&planned),
            gateway_url: None,
        };
        let report = run_post_checks(&ctx).await;
        let file_count = report
            .results
            .iter()
            .find(|r| r.check_name == "file_count")
            .unwrap();
        assert_eq!(file_count.status, CheckStatus::Fail);
    }
}
