//! Pre-deployment gate
//!
//! Every check here runs before any target mutation. A FAIL aborts the
//! run; unknown model names degrade to WARN plus exclusion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::json;
use sysinfo::Disks;
use tracing::debug;

use crate::app::options::DeploymentConfig;
use crate::catalog::model::{self, Model};
use crate::envresolve::EnvironmentVariable;
use crate::errors::DeployerError;
use crate::validate::{GateReport, ValidationResult};

/// Minimum free disk space required before deploying
pub const MIN_FREE_DISK_BYTES: u64 = 100 * 1024 * 1024;

/// Port the deployed gateway is expected to bind
pub const GATEWAY_PORT: u16 = 4000;

/// Outcome of the pre-deployment gate
#[derive(Debug)]
pub struct PreGate {
    pub report: GateReport,
    /// Requested models that exist in the catalog, selection order kept
    pub effective_models: Vec<&'static Model>,
}

/// Run every pre-deployment check in order
pub async fn run_pre_checks(
    config: &DeploymentConfig,
    requested_models: &[String],
    resolved_env: &BTreeMap<String, EnvironmentVariable>,
) -> PreGate {
    let mut report = GateReport::default();

    report.push(check_source_structure(config));
    report.push(check_target_writable(&config.target_dir).await);
    report.push(check_disk_space(&config.target_dir));
    report.push(ValidationResult::pass(
        "preset",
        format!("preset '{}' is valid", config.preset),
    ));

    let (effective_models, model_result) = check_model_names(requested_models);
    report.push(model_result);
    report.push(check_required_vars(config, resolved_env));
    report.push(check_port_conflict().await);

    PreGate {
        report,
        effective_models,
    }
}

/// Map a failed pre-gate to the typed error the CLI reports
pub fn gate_error(report: &GateReport) -> Option<DeployerError> {
    let failed = report.failures();
    let first = failed.first()?;
    let summary = report.failure_summary();
    Some(match first.check_name.as_str() {
        "source_structure" => DeployerError::SourceMissing(summary),
        "target_writable" => DeployerError::Permission(summary),
        "disk_space" => DeployerError::DiskSpace(summary),
        _ => DeployerError::Validation(summary),
    })
}

fn check_source_structure(config: &DeploymentConfig) -> ValidationResult {
    let started = Instant::now();
    if !config.source_dir.is_dir() {
        return ValidationResult::fail(
            "source_structure",
            format!("source directory {} does not exist", config.source_dir.display()),
        )
        .timed(started);
    }
    match config.preset.validate(&config.source_dir) {
        Ok(()) => ValidationResult::pass(
            "source_structure",
            format!("source tree at {} looks complete", config.source_dir.display()),
        )
        .timed(started),
        Err(e) => ValidationResult::fail("source_structure", e.to_string()).timed(started),
    }
}

async fn check_target_writable(target: &Path) -> ValidationResult {
    let started = Instant::now();
    let probe_dir = nearest_existing_ancestor(target);
    let probe = probe_dir.join(format!(".gwdeploy-probe-{}", std::process::id()));

    match tokio::fs::write(&probe, b"probe").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            ValidationResult::pass(
                "target_writable",
                format!("{} is writable", probe_dir.display()),
            )
            .timed(started)
        }
        Err(e) => ValidationResult::fail(
            "target_writable",
            format!("cannot write under {}: {}", probe_dir.display(), e),
        )
        .timed(started),
    }
}

fn check_disk_space(target: &Path) -> ValidationResult {
    let started = Instant::now();
    let probe_dir = nearest_existing_ancestor(target);
    let disks = Disks::new_with_refreshed_list();

    let mut best: Option<(&Path, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if probe_dir.starts_with(mount) {
            let better = match best {
                Some((prev, _)) => mount.as_os_str().len() > prev.as_os_str().len(),
                None => true,
            };
            if better {
                best = Some((mount, disk.available_space()));
            }
        }
    }

    match best {
        Some((mount, available)) if available >= MIN_FREE_DISK_BYTES => ValidationResult::pass(
            "disk_space",
            format!(
                "{} available on {}",
                crate::utils::format_bytes(available),
                mount.display()
            ),
        )
        .timed(started),
        Some((mount, available)) => ValidationResult::fail(
            "disk_space",
            format!(
                "only {} available on {}, need at least {}",
                crate::utils::format_bytes(available),
                mount.display(),
                crate::utils::format_bytes(MIN_FREE_DISK_BYTES)
            ),
        )
        .timed(started),
        None => {
            debug!("no disk matched {}, skipping space check", probe_dir.display());
            ValidationResult::skip("disk_space", "no disk information available").timed(started)
        }
    }
}

/// Unknown model names degrade to WARN and are excluded, not fatal
fn check_model_names(requested: &[String]) -> (Vec<&'static Model>, ValidationResult) {
    let started = Instant::now();
    let (known, unknown) = model::partition_known(requested);

    let result = if unknown.is_empty() {
        ValidationResult::pass(
            "model_names",
            format!("{} requested model(s) recognized", known.len()),
        )
    } else {
        ValidationResult::warn(
            "model_names",
            format!(
                "unknown model name(s) excluded: {}; proceeding with {} recognized",
                unknown.join(", "),
                known.len()
            ),
        )
        .with_details(json!({ "unknown": unknown, "recognized": known.len() }))
    };
    (known, result.timed(started))
}

fn check_required_vars(
    config: &DeploymentConfig,
    resolved: &BTreeMap<String, EnvironmentVariable>,
) -> ValidationResult {
    let started = Instant::now();
    let missing: Vec<&str> = config
        .preset
        .required_vars()
        .iter()
        .copied()
        .filter(|name| !resolved.contains_key(*name))
        .collect();

    if missing.is_empty() {
        return ValidationResult::pass("required_vars", "all required variables resolved")
            .timed(started);
    }

    let blocking: Vec<&str> = missing
        .iter()
        .copied()
        .filter(|name| config.preset.blocking_vars().contains(name))
        .collect();

    let result = if blocking.is_empty() {
        ValidationResult::warn(
            "required_vars",
            format!("unresolved required variable(s): {}", missing.join(", ")),
        )
    } else {
        ValidationResult::fail(
            "required_vars",
            format!(
                "preset '{}' cannot deploy without: {}",
                config.preset,
                blocking.join(", ")
            ),
        )
    };
    result
        .with_details(json!({ "missing": missing }))
        .timed(started)
}

/// A process already answering on the gateway port is a WARN the user may
/// override, never fatal.
async fn check_port_conflict() -> ValidationResult {
    let started = Instant::now();
    let attempt = tokio::time::timeout(
        Duration::from_millis(500),
        tokio::net::TcpStream::connect(("127.0.0.1", GATEWAY_PORT)),
    )
    .await;

    match attempt {
        Ok(Ok(_)) => ValidationResult::warn(
            "port_conflict",
            format!(
                "something is already listening on port {}; the deployed gateway may fail to bind",
                GATEWAY_PORT
            ),
        )
        .timed(started),
        _ => ValidationResult::pass("port_conflict", format!("port {} is free", GATEWAY_PORT))
            .timed(started),
    }
}

fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    let mut current = path;
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return PathBuf::from("."),
        }
    }
}
