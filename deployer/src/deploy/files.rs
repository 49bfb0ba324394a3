//! File deployment
//!
//! Writes the merged config, the resolved environment file, the preset's
//! asset subtrees, and the startup script into the target. Every write
//! goes through the atomic write path; the returned plan lists every
//! file placed, for the post-deployment gate to verify.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::envresolve::{self, EnvironmentVariable};
use crate::errors::DeployerError;
use crate::merge::ConfigMerger;
use crate::storage::layout::TargetLayout;
use crate::validate::pre::GATEWAY_PORT;

/// Deploys rendered artifacts into one target directory
#[derive(Debug)]
pub struct FileDeployer {
    source_dir: PathBuf,
    layout: TargetLayout,
}

impl FileDeployer {
    pub fn new(source_dir: impl Into<PathBuf>, layout: TargetLayout) -> Self {
        Self {
            source_dir: source_dir.into(),
            layout,
        }
    }

    /// Write everything. Returns the absolute path of every file placed.
    /// `required_vars` names every variable the `.env` file must list,
    /// resolved or not.
    pub async fn deploy(
        &self,
        merged: &serde_yaml::Value,
        assets: &[&str],
        env: &BTreeMap<String, EnvironmentVariable>,
        required_vars: &[&str],
    ) -> Result<Vec<PathBuf>, DeployerError> {
        self.layout.root_dir().create_private().await?;
        self.layout.config_dir().create().await?;

        let mut placed = Vec::new();

        // Merged config, re-parsed from the staged bytes before the rename
        let rendered = ConfigMerger::to_yaml_string(merged)?;
        let config_file = self.layout.config_file();
        config_file
            .write_atomic_checked(rendered.as_bytes(), |bytes| {
                serde_yaml::from_slice::<serde_yaml::Value>(bytes)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .await?;
        placed.push(config_file.path().to_path_buf());

        placed.extend(self.copy_assets(assets).await?);

        // Secrets land with owner-only permissions
        let env_file = self.layout.env_file();
        env_file
            .write_atomic(envresolve::render_env_file(env, required_vars).as_bytes())
            .await?;
        env_file.set_mode(0o600).await?;
        placed.push(env_file.path().to_path_buf());

        let script = self.layout.start_script();
        script.write_atomic(start_script_contents().as_bytes()).await?;
        script.set_mode(0o755).await?;
        placed.push(script.path().to_path_buf());

        placed.sort();
        info!("{} files deployed to {}", placed.len(), self.layout.root.display());
        Ok(placed)
    }

    /// Copy each asset subtree from the source into the target. Subtrees
    /// absent from the source are skipped, not errors; preset validation
    /// already confirmed everything mandatory.
    async fn copy_assets(&self, assets: &[&str]) -> Result<Vec<PathBuf>, DeployerError> {
        let mut copied = Vec::new();
        let source = crate::filesys::dir::Dir::new(&self.source_dir);
        for asset in assets {
            let src = source.subdir(asset);
            if !src.exists().await {
                debug!("asset subtree {} absent from source, skipping", asset);
                continue;
            }
            let dest = self.layout.root.join(asset);
            copied.extend(src.copy_tree_to(&dest).await?);
        }
        Ok(copied)
    }
}

fn start_script_contents() -> String {
    format!(
        "#!/usr/bin/env bash\n\
         set -euo pipefail\n\
         cd \"$(dirname \"$0\")\"\n\
         set -a\n\
         source ./.env\n\
         set +a\n\
         exec litellm --config config/litellm.yaml --port {}\n",
        GATEWAY_PORT
    )
}
