//! Command-line interface
//!
//! A bare `gwdeploy` with deploy flags is an install; subcommands cover
//! updates, rollback, and backup inspection.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::options::GatewayType;
use crate::catalog::preset::Preset;

#[derive(Debug, Parser)]
#[command(
    name = "gwdeploy",
    about = "Deploy LLM gateway configuration bundles",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Deploy flags used when no subcommand is given (install)
    #[command(flatten)]
    pub deploy: DeployArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a fresh gateway configuration
    Install(DeployArgs),

    /// Modify the model selection of an existing deployment
    Update(UpdateArgs),

    /// Restore a previous deployment from backup
    Rollback {
        /// Backup archive name; the most recent backup when omitted
        backup: Option<String>,

        /// Deployment directory to restore
        #[arg(long)]
        target_dir: Option<PathBuf>,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// List available backups for a target
    ListBackups {
        /// Deployment directory to inspect
        #[arg(long)]
        target_dir: Option<PathBuf>,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// Deployment preset
    #[arg(long, value_enum, default_value = "basic")]
    pub preset: Preset,

    /// Comma-separated model ids; preset defaults when omitted
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,

    /// Configuration bundle checkout; current directory when omitted
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Deployment directory; ~/.llm-gateway when omitted
    #[arg(long)]
    pub target_dir: Option<PathBuf>,

    /// Kind of gateway endpoint being deployed
    #[arg(long, value_enum, default_value = "litellm")]
    pub gateway_type: GatewayType,

    /// Corporate gateway endpoint URL
    #[arg(long)]
    pub gateway_url: Option<String>,

    /// Auth token for the corporate gateway
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Forward proxy URL
    #[arg(long)]
    pub proxy: Option<String>,

    /// Proxy credentials as user:password
    #[arg(long)]
    pub proxy_auth: Option<String>,

    /// Explicit variable override, repeatable: --var KEY=VALUE
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Host application settings file to patch (enterprise preset)
    #[arg(long)]
    pub settings_path: Option<PathBuf>,

    /// Print the plan without touching the target
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the overwrite confirmation on an existing deployment
    #[arg(long)]
    pub force: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Args)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub deploy: DeployArgs,

    /// Model ids to add to the deployed selection
    #[arg(long, value_delimiter = ',')]
    pub add_models: Vec<String>,

    /// Model ids to remove from the deployed selection
    #[arg(long, value_delimiter = ',')]
    pub remove_models: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_invocation_is_an_install() {
        let cli = Cli::parse_from(["gwdeploy", "--preset", "basic", "--dry-run"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.deploy.preset, Preset::Basic);
        assert!(cli.deploy.dry_run);
    }

    #[test]
    fn test_models_split_on_commas() {
        let cli = Cli::parse_from([
            "gwdeploy",
            "install",
            "--models",
            "gemini-2.5-flash,deepseek-r1",
        ]);
        let Some(Command::Install(args)) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.models, vec!["gemini-2.5-flash", "deepseek-r1"]);
    }

    #[test]
    fn test_update_add_remove() {
        let cli = Cli::parse_from([
            "gwdeploy",
            "update",
            "--add-models",
            "codestral",
            "--remove-models",
            "gemini-2.5-pro",
        ]);
        let Some(Command::Update(args)) = cli.command else {
            panic!("expected update");
        };
        assert_eq!(args.add_models, vec!["codestral"]);
        assert_eq!(args.remove_models, vec!["gemini-2.5-pro"]);
    }

    #[test]
    fn test_rollback_named_backup() {
        let cli = Cli::parse_from(["gwdeploy", "rollback", "gateway-backup-20260830-101500"]);
        let Some(Command::Rollback { backup, .. }) = cli.command else {
            panic!("expected rollback");
        };
        assert_eq!(backup.as_deref(), Some("gateway-backup-20260830-101500"));
    }

    #[test]
    fn test_repeated_var_overrides() {
        let cli = Cli::parse_from([
            "gwdeploy",
            "--var",
            "VERTEX_PROJECT_ID=my-project",
            "--var",
            "VERTEX_LOCATION=us-central1",
        ]);
        assert_eq!(cli.deploy.vars.len(), 2);
    }
}
