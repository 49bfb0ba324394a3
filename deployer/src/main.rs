//! gwdeploy binary entry point

use clap::Parser;
use colored::Colorize;
use tracing::debug;

use gwdeploy::app::options::DeploymentConfig;
use gwdeploy::app::run;
use gwdeploy::audit::Operation;
use gwdeploy::cli::{Cli, Command};
use gwdeploy::errors::DeployerError;
use gwdeploy::logs::{init_logging, LogLevel, LogOptions};
use gwdeploy::utils;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        None => cli.deploy.verbose,
        Some(Command::Install(args)) => args.verbose,
        Some(Command::Update(args)) => args.deploy.verbose,
        Some(Command::Rollback { verbose, .. }) => *verbose,
        Some(Command::ListBackups { verbose, .. }) => *verbose,
    };
    let options = LogOptions {
        log_level: if verbose { LogLevel::Debug } else { LogLevel::Info },
        json_format: false,
    };
    if let Err(e) = init_logging(options) {
        eprintln!("could not initialize logging: {}", e);
    }

    let version = utils::version_info();
    debug!(
        "gwdeploy {} ({}, built {})",
        version.version, version.git_hash, version.build_time
    );

    if let Err(error) = dispatch(cli).await {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), error);
        if let Some(hint) = error.hint() {
            eprintln!("{} {}", "Hint:".yellow().bold(), hint);
        }
        std::process::exit(error.exit_code());
    }
}

async fn dispatch(cli: Cli) -> Result<(), DeployerError> {
    match cli.command {
        None => {
            let config = DeploymentConfig::from_args(Operation::Install, &cli.deploy)?;
            run::run(&config).await
        }
        Some(Command::Install(args)) => {
            let config = DeploymentConfig::from_args(Operation::Install, &args)?;
            run::run(&config).await
        }
        Some(Command::Update(args)) => {
            let mut config = DeploymentConfig::from_args(Operation::Update, &args.deploy)?;
            config.models = run::effective_update_models(
                &config.layout(),
                &config.models,
                &args.add_models,
                &args.remove_models,
            )
            .await?;
            run::run(&config).await
        }
        Some(Command::Rollback {
            backup, target_dir, ..
        }) => run::run_rollback(target_dir, backup).await,
        Some(Command::ListBackups { target_dir, .. }) => {
            run::run_list_backups(target_dir).await
        }
    }
}
