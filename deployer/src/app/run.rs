//! Run orchestration
//!
//! Drives the deployment state machine for install/update, and the
//! rollback and list-backups commands. Strictly sequential: one phase at
//! a time, every transition validated by [`fsm::process`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::app::options::DeploymentConfig;
use crate::audit::{AuditLogger, DeploymentLogEntry, Operation, OperationStatus};
use crate::backup::{BackupManager, BackupMetadata, BackupRef};
use crate::catalog::model::Model;
use crate::catalog::preset::PostStepContext;
use crate::deploy::files::FileDeployer;
use crate::deploy::fsm::{self, DeployEvent, DeployState};
use crate::deploy::lock::DeployLock;
use crate::envresolve::{EnvResolver, EnvironmentVariable};
use crate::errors::DeployerError;
use crate::merge::ConfigMerger;
use crate::storage::layout::TargetLayout;
use crate::utils;
use crate::validate::post::{run_post_checks, PostCheckContext};
use crate::validate::pre::{gate_error, run_pre_checks};

/// Run an install or update to completion
pub async fn run(config: &DeploymentConfig) -> Result<(), DeployerError> {
    let started = Instant::now();
    let layout = config.layout();
    let _lock = DeployLock::acquire(&layout.lock_path()).await?;
    let audit = AuditLogger::new(layout.clone());

    let mut state = fsm::process(DeployState::Created, DeployEvent::Start)?;

    // Resolve the environment before the gate so the gate can judge it
    let resolver = if config.dry_run {
        EnvResolver::new(config.env_overrides()).without_probes()
    } else {
        EnvResolver::new(config.env_overrides())
    };
    let resolved = resolver
        .resolve(
            config.preset.required_vars(),
            config.preset.optional_vars(),
            Some(layout.env_file().path()),
        )
        .await?;

    let requested = config.requested_models();
    println!("{}", "Pre-deployment checks".bold());
    let pre = run_pre_checks(config, &requested, &resolved).await;
    pre.report.print();

    if pre.report.has_failures() {
        let error = gate_error(&pre.report)
            .unwrap_or_else(|| DeployerError::Validation(pre.report.failure_summary()));
        fsm::process(state, DeployEvent::Fail(error.to_string()))?;
        // Nothing was written, so nothing lands in the audit log either
        return Err(error);
    }

    if config.dry_run {
        let state = fsm::process(state, DeployEvent::DryRun)?;
        debug_assert!(state.is_terminal());
        print_plan(config, &layout, &pre.effective_models, &resolved);
        return Ok(());
    }

    if layout.is_deployed().await && !config.force && !confirm_overwrite(&layout).await? {
        println!("Aborted; the existing deployment was not touched.");
        return Ok(());
    }

    state = fsm::process(state, DeployEvent::PreValidated)?;

    let manager = BackupManager::new(layout.clone());
    let backup = manager.backup(Some(config)).await.map_err(|e| {
        DeployerError::Backup(format!("pre-deployment backup failed, nothing deployed: {}", e))
    })?;
    if let Some(backup) = &backup {
        println!("Backup created: {}", backup.filename);
    }
    state = fsm::process(state, DeployEvent::BackupDone)?;

    // The mutating phase races the shutdown signal; an interrupt is a
    // failure that rolls back like any other
    let phase = deploy_phase(config, &layout, &pre.effective_models, &resolved);
    let outcome = tokio::select! {
        outcome = phase => outcome,
        _ = shutdown_signal() => Err(DeployerError::Interrupted(
            "received termination signal during deployment".to_string(),
        )),
    };

    match outcome {
        Ok(PhaseOutcome::Deployed(placed)) => {
            state = fsm::process(state, DeployEvent::Deployed)?;
            state = fsm::process(state, DeployEvent::PostValidated)?;
            debug_assert_eq!(state, DeployState::Completed);

            let mut entry = success_entry(config, started, &placed, backup.as_ref());
            entry.models = pre
                .effective_models
                .iter()
                .map(|m| m.model_id.to_string())
                .collect();
            append_audit(&audit, entry).await;

            print_success(config, &layout, placed.len(), started);
            Ok(())
        }
        Ok(PhaseOutcome::PostGateFailed(summary)) => {
            state = fsm::process(state, DeployEvent::Deployed)?;
            state = fsm::process(state, DeployEvent::PostValidationFailed(summary.clone()))?;

            let error = DeployerError::Validation(format!(
                "post-deployment checks failed: {}",
                summary
            ));
            let recovery = recover(&manager, backup.is_some()).await;
            state = fsm::process(state, DeployEvent::RollbackFinished)?;
            debug_assert_eq!(state, DeployState::Failed);

            let error = describe_failure(error, recovery, &layout);
            append_audit(&audit, failure_entry(config, started, &error)).await;
            Err(error)
        }
        Err(error) => {
            fsm::process(state, DeployEvent::Fail(error.to_string()))?;
            let recovery = recover(&manager, backup.is_some()).await;
            let error = describe_failure(error, recovery, &layout);
            append_audit(&audit, failure_entry(config, started, &error)).await;
            Err(error)
        }
    }
}

/// What the mutating phase produced
enum PhaseOutcome {
    Deployed(Vec<PathBuf>),
    /// Files landed but the post gate rejected them
    PostGateFailed(String),
}

/// Best-effort restore after a failed deployment
async fn recover(
    manager: &BackupManager,
    backup_exists: bool,
) -> Result<Option<BackupMetadata>, DeployerError> {
    if !backup_exists {
        warn!("no backup exists for this target, leaving partial deployment in place");
        return Ok(None);
    }
    restore_latest(manager).await
}

/// Fold the recovery outcome into the error the user sees
fn describe_failure(
    error: DeployerError,
    recovery: Result<Option<BackupMetadata>, DeployerError>,
    layout: &TargetLayout,
) -> DeployerError {
    match recovery {
        Ok(Some(restored)) => DeployerError::Validation(format!(
            "{}; previous state restored from {}",
            error, restored.filename
        )),
        Ok(None) => error,
        Err(rollback_error) => DeployerError::Rollback(format!(
            "deployment failed ({}) and rollback also failed ({}); inspect \
             deployment.log and the backups/ directory under {}",
            error,
            rollback_error,
            layout.root.display()
        )),
    }
}

/// Merge, write files, run preset post-steps, then the post gate
async fn deploy_phase(
    config: &DeploymentConfig,
    layout: &TargetLayout,
    models: &[&'static Model],
    resolved: &BTreeMap<String, EnvironmentVariable>,
) -> Result<PhaseOutcome, DeployerError> {
    let merger = ConfigMerger::new(&config.source_dir);
    let merged = merger.merge(config.preset.template_file(), models).await?;

    let behavior = config.preset.behavior();
    let deployer = FileDeployer::new(&config.source_dir, layout.clone());
    let placed = deployer
        .deploy(
            &merged,
            behavior.assets(),
            resolved,
            config.preset.required_vars(),
        )
        .await?;

    let ctx = PostStepContext {
        config,
        env: resolved,
    };
    behavior.post_steps(&ctx).await?;

    println!("{}", "Post-deployment checks".bold());
    let report = run_post_checks(&PostCheckContext {
        root: &layout.root,
        planned_files: Some(&placed),
        gateway_url: config.gateway_url.as_deref(),
    })
    .await;
    report.print();

    if report.has_failures() {
        return Ok(PhaseOutcome::PostGateFailed(report.failure_summary()));
    }
    Ok(PhaseOutcome::Deployed(placed))
}

/// Restore the most recent backup after a failed deployment
async fn restore_latest(
    manager: &BackupManager,
) -> Result<Option<BackupMetadata>, DeployerError> {
    info!("rolling back to the most recent backup");
    let pending = manager.prepare_restore(&BackupRef::Latest).await?;
    let restored = pending.commit().await?;
    Ok(Some(restored))
}

/// Restore a backup on user request
pub async fn run_rollback(
    target_dir: Option<PathBuf>,
    backup: Option<String>,
) -> Result<(), DeployerError> {
    let started = Instant::now();
    let layout = match target_dir {
        Some(dir) => TargetLayout::new(dir),
        None => TargetLayout::default(),
    };
    let _lock = DeployLock::acquire(&layout.lock_path()).await?;
    let audit = AuditLogger::new(layout.clone());
    let manager = BackupManager::new(layout.clone());

    let reference = match backup {
        Some(name) => BackupRef::Named(name),
        None => BackupRef::Latest,
    };

    let pending = manager.prepare_restore(&reference).await?;

    // Judge the extraction before anything live moves
    println!("{}", "Validating backup contents".bold());
    let report = run_post_checks(&PostCheckContext {
        root: pending.staging_root(),
        planned_files: None,
        gateway_url: None,
    })
    .await;
    report.print();

    if report.has_failures() {
        let filename = pending.metadata.filename.clone();
        pending.abort().await?;
        let error = DeployerError::Rollback(format!(
            "backup {} failed validation and was not restored: {}",
            filename,
            report.failure_summary()
        ));
        append_audit(&audit, rollback_entry(started, Err(&error))).await;
        return Err(error);
    }

    let restored = pending.commit().await?;
    append_audit(&audit, rollback_entry(started, Ok(&restored))).await;
    println!(
        "{} restored {} into {}",
        "Rollback complete:".green().bold(),
        restored.filename,
        layout.root.display()
    );
    Ok(())
}

/// Print the backup inventory for a target
pub async fn run_list_backups(target_dir: Option<PathBuf>) -> Result<(), DeployerError> {
    let layout = match target_dir {
        Some(dir) => TargetLayout::new(dir),
        None => TargetLayout::default(),
    };
    let backups = BackupManager::new(layout.clone()).list().await?;

    if backups.is_empty() {
        println!("No backups under {}", layout.backups_dir().path().display());
        return Ok(());
    }

    println!("Backups under {}:", layout.backups_dir().path().display());
    for backup in backups {
        let preset = backup
            .config
            .as_ref()
            .map(|c| c.preset.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:>10}  {}  preset={}",
            backup.filename,
            utils::format_bytes(backup.size_bytes),
            backup.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            preset
        );
    }
    Ok(())
}

/// Selection for an update run: the deployed model set plus additions,
/// minus removals. Requires an existing deployment.
pub async fn effective_update_models(
    layout: &TargetLayout,
    explicit: &[String],
    add: &[String],
    remove: &[String],
) -> Result<Vec<String>, DeployerError> {
    if !layout.is_deployed().await {
        return Err(DeployerError::InvalidArgument(format!(
            "nothing deployed at {}; run install first",
            layout.root.display()
        )));
    }

    let mut selection: Vec<String> = if explicit.is_empty() {
        let contents = layout.config_file().read_string().await?;
        let document: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        crate::merge::model_names(&document)
    } else {
        explicit.to_vec()
    };

    for id in add {
        if !selection.contains(id) {
            selection.push(id.clone());
        }
    }
    selection.retain(|id| !remove.contains(id));

    if selection.is_empty() {
        return Err(DeployerError::InvalidArgument(
            "the update would leave no models deployed".to_string(),
        ));
    }
    Ok(selection)
}

/// Ask before overwriting an existing deployment. Declining is a clean
/// exit, not an error.
async fn confirm_overwrite(layout: &TargetLayout) -> Result<bool, DeployerError> {
    print!(
        "{} already contains a deployment. Overwrite? [y/N] ",
        layout.root.display()
    );
    use std::io::Write;
    std::io::stdout().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn print_plan(
    config: &DeploymentConfig,
    layout: &TargetLayout,
    models: &[&'static Model],
    resolved: &BTreeMap<String, EnvironmentVariable>,
) {
    println!();
    println!("{}", "Dry run; nothing was written.".yellow().bold());
    println!("  Preset:  {}", config.preset);
    println!("  Source:  {}", config.source_dir.display());
    println!("  Target:  {}", layout.root.display());
    println!("  Models:");
    for model in models {
        println!(
            "    {} ({}, {:?})",
            model.model_id, model.display_name, model.priority
        );
    }
    println!("  Environment:");
    for variable in resolved.values() {
        println!(
            "    {}={} [{:?}]",
            variable.name,
            variable.display_value(),
            variable.source
        );
    }
    println!("  Files to write:");
    println!("    {}", layout.config_file().path().display());
    println!("    {}", layout.env_file().path().display());
    println!("    {}", layout.start_script().path().display());
    println!("    asset subtrees: {}", config.preset.behavior().assets().join(", "));
}

fn print_success(
    config: &DeploymentConfig,
    layout: &TargetLayout,
    files: usize,
    started: Instant,
) {
    println!();
    println!(
        "{} {} preset deployed to {} ({} files, {} ms)",
        "Success:".green().bold(),
        config.preset,
        layout.root.display(),
        files,
        started.elapsed().as_millis()
    );
    println!(
        "Next: {}",
        layout.start_script().path().display().to_string().bold()
    );
}

fn success_entry(
    config: &DeploymentConfig,
    started: Instant,
    placed: &[PathBuf],
    backup: Option<&BackupMetadata>,
) -> DeploymentLogEntry {
    let mut entry = DeploymentLogEntry::new(config.operation, OperationStatus::Success);
    entry.duration_ms = started.elapsed().as_millis() as u64;
    entry.preset = Some(config.preset);
    entry.files_copied = placed.len();
    entry.backup_created = backup.map(|b| b.filename.clone());
    entry
}

fn failure_entry(
    config: &DeploymentConfig,
    started: Instant,
    error: &DeployerError,
) -> DeploymentLogEntry {
    let mut entry = DeploymentLogEntry::new(config.operation, OperationStatus::Failure);
    entry.duration_ms = started.elapsed().as_millis() as u64;
    entry.preset = Some(config.preset);
    entry.error_message = Some(error.to_string());
    entry
}

fn rollback_entry(started: Instant, outcome: Result<&BackupMetadata, &DeployerError>) -> DeploymentLogEntry {
    let mut entry = match outcome {
        Ok(restored) => {
            let mut entry =
                DeploymentLogEntry::new(Operation::Rollback, OperationStatus::Success);
            entry.backup_created = Some(restored.filename.clone());
            entry
        }
        Err(error) => {
            let mut entry =
                DeploymentLogEntry::new(Operation::Rollback, OperationStatus::Failure);
            entry.error_message = Some(error.to_string());
            entry
        }
    };
    entry.duration_ms = started.elapsed().as_millis() as u64;
    entry
}

/// An unwritable audit log is reported, never fatal
async fn append_audit(audit: &AuditLogger, entry: DeploymentLogEntry) {
    if let Err(e) = audit.append(&entry).await {
        warn!("could not append audit entry: {}", e);
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn deployed_layout() -> (tempfile::TempDir, TargetLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = TargetLayout::new(dir.path().join("gw"));
        layout.config_dir().create().await.unwrap();
        layout
            .config_file()
            .write_atomic(
                b"model_list:\n  - model_name: gemini-2.5-flash\n  - model_name: deepseek-r1\n",
            )
            .await
            .unwrap();
        (dir, layout)
    }

    #[tokio::test]
    async fn test_update_selection_from_deployed_state() {
        let (_dir, layout) = deployed_layout().await;
        let selection = effective_update_models(
            &layout,
            &[],
            &["codestral".to_string()],
            &["deepseek-r1".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(selection, vec!["gemini-2.5-flash", "codestral"]);
    }

    #[tokio::test]
    async fn test_update_requires_existing_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TargetLayout::new(dir.path().join("empty"));
        let err = effective_update_models(&layout, &[], &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_update_cannot_empty_the_selection() {
        let (_dir, layout) = deployed_layout().await;
        let err = effective_update_models(
            &layout,
            &[],
            &[],
            &["gemini-2.5-flash".to_string(), "deepseek-r1".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DeployerError::InvalidArgument(_)));
    }
}
