//! Preset registry
//!
//! Presets are fixed at build time. The closed enum plus exhaustive-match
//! accessors replace stringly-typed preset tables; per-preset behavior that
//! the orchestrator must not branch on lives behind [`PresetBehavior`].

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::options::DeploymentConfig;
use crate::envresolve::EnvironmentVariable;
use crate::errors::DeployerError;
use crate::storage::settings::{self, SettingsPatch};

/// A named, fixed bundle of template/asset choices for a deployment scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Single-provider Vertex AI gateway
    Basic,
    /// Corporate gateway endpoint, patches the host application settings
    Enterprise,
    /// All providers, full model catalog
    MultiProvider,
    /// Gateway behind a corporate forward proxy
    Proxy,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::Basic,
        Preset::Enterprise,
        Preset::MultiProvider,
        Preset::Proxy,
    ];

    /// Resolve a preset by name, listing valid choices on failure
    pub fn resolve(name: &str) -> Result<Self, DeployerError> {
        match name {
            "basic" => Ok(Preset::Basic),
            "enterprise" => Ok(Preset::Enterprise),
            "multi-provider" => Ok(Preset::MultiProvider),
            "proxy" => Ok(Preset::Proxy),
            other => Err(DeployerError::InvalidArgument(format!(
                "unknown preset '{}'; valid presets: basic, enterprise, multi-provider, proxy",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Preset::Basic => "basic",
            Preset::Enterprise => "enterprise",
            Preset::MultiProvider => "multi-provider",
            Preset::Proxy => "proxy",
        }
    }

    /// Base template path relative to the source tree
    pub fn template_file(self) -> &'static str {
        match self {
            Preset::Basic => "templates/litellm-basic.yaml",
            Preset::Enterprise => "templates/litellm-enterprise.yaml",
            Preset::MultiProvider => "templates/litellm-multi-provider.yaml",
            Preset::Proxy => "templates/litellm-proxy.yaml",
        }
    }

    /// Model ids deployed when no explicit selection is given
    pub fn default_models(self) -> &'static [&'static str] {
        match self {
            Preset::Basic => &["gemini-2.5-flash", "gemini-2.5-pro"],
            Preset::Enterprise => &["gemini-2.5-flash", "gemini-2.5-pro"],
            Preset::MultiProvider => &[
                "gemini-2.5-flash",
                "gemini-2.5-pro",
                "deepseek-r1",
                "llama3-405b",
                "codestral",
                "qwen3-coder-480b",
                "qwen3-235b",
                "gpt-oss-20b",
            ],
            Preset::Proxy => &["gemini-2.5-flash"],
        }
    }

    /// Environment variables this preset requires
    pub fn required_vars(self) -> &'static [&'static str] {
        match self {
            Preset::Basic => &["LITELLM_MASTER_KEY", "VERTEX_PROJECT_ID", "VERTEX_LOCATION"],
            Preset::Enterprise => &["LITELLM_MASTER_KEY", "ANTHROPIC_BASE_URL"],
            Preset::MultiProvider => &[
                "LITELLM_MASTER_KEY",
                "ANTHROPIC_API_KEY",
                "AWS_REGION",
                "VERTEX_PROJECT_ID",
                "VERTEX_LOCATION",
            ],
            Preset::Proxy => &["LITELLM_MASTER_KEY", "HTTPS_PROXY"],
        }
    }

    /// Environment variables this preset can use but does not require
    pub fn optional_vars(self) -> &'static [&'static str] {
        match self {
            Preset::Basic => &["GOOGLE_APPLICATION_CREDENTIALS"],
            Preset::Enterprise => &["ANTHROPIC_AUTH_TOKEN", "ANTHROPIC_CUSTOM_HEADERS"],
            Preset::MultiProvider => &[
                "AWS_ACCESS_KEY_ID",
                "AWS_SECRET_ACCESS_KEY",
                "GOOGLE_APPLICATION_CREDENTIALS",
            ],
            Preset::Proxy => &["HTTP_PROXY", "NO_PROXY"],
        }
    }

    /// Required variables whose absence fails the pre-deployment gate
    /// instead of degrading to a warning
    pub fn blocking_vars(self) -> &'static [&'static str] {
        match self {
            Preset::Enterprise => &["ANTHROPIC_BASE_URL"],
            _ => &[],
        }
    }

    /// Confirm the preset's template file exists under the source tree
    pub fn validate(self, source_dir: &Path) -> Result<(), DeployerError> {
        let template = source_dir.join(self.template_file());
        if !template.is_file() {
            return Err(DeployerError::SourceMissing(format!(
                "template for preset '{}' not found at {}",
                self.name(),
                template.display()
            )));
        }
        Ok(())
    }

    /// Per-preset behavior the orchestrator drives through the interface
    pub fn behavior(self) -> &'static dyn PresetBehavior {
        match self {
            Preset::Basic => &BasicPreset,
            Preset::Enterprise => &EnterprisePreset,
            Preset::MultiProvider => &MultiProviderPreset,
            Preset::Proxy => &ProxyPreset,
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Context handed to preset post-deployment steps
pub struct PostStepContext<'a> {
    pub config: &'a DeploymentConfig,
    pub env: &'a BTreeMap<String, EnvironmentVariable>,
}

/// Capability interface implemented by every preset. The orchestrator is
/// written once against this trait instead of branching on preset names.
#[async_trait]
pub trait PresetBehavior: Send + Sync {
    /// Source subtrees copied verbatim into the target
    fn assets(&self) -> &'static [&'static str];

    /// Extra steps run after file deployment, before the post gate
    async fn post_steps(&self, ctx: &PostStepContext<'_>) -> Result<(), DeployerError>;
}

struct BasicPreset;

#[async_trait]
impl PresetBehavior for BasicPreset {
    fn assets(&self) -> &'static [&'static str] {
        &["templates", "scripts", "docs", "examples"]
    }

    async fn post_steps(&self, _ctx: &PostStepContext<'_>) -> Result<(), DeployerError> {
        Ok(())
    }
}

struct EnterprisePreset;

#[async_trait]
impl PresetBehavior for EnterprisePreset {
    fn assets(&self) -> &'static [&'static str] {
        &["templates", "scripts", "docs"]
    }

    /// Patch the host application settings with the resolved gateway
    /// endpoint. Only the keys this tool owns are touched.
    async fn post_steps(&self, ctx: &PostStepContext<'_>) -> Result<(), DeployerError> {
        let endpoint = ctx
            .config
            .gateway_url
            .clone()
            .or_else(|| ctx.env.get("ANTHROPIC_BASE_URL").map(|v| v.value.clone()));

        let Some(endpoint) = endpoint else {
            debug!("no gateway endpoint resolved, skipping settings patch");
            return Ok(());
        };

        let Some(path) = ctx
            .config
            .settings_path
            .clone()
            .or_else(settings::default_settings_path)
        else {
            debug!("no host settings path available, skipping settings patch");
            return Ok(());
        };

        let patch = SettingsPatch {
            gateway_url: endpoint,
            auth_token: ctx.config.auth_token.clone(),
        };
        settings::patch_settings(&path, &patch).await?;
        info!("patched host settings at {}", path.display());
        Ok(())
    }
}

struct MultiProviderPreset;

#[async_trait]
impl PresetBehavior for MultiProviderPreset {
    fn assets(&self) -> &'static [&'static str] {
        &["templates", "scripts", "docs", "examples"]
    }

    async fn post_steps(&self, _ctx: &PostStepContext<'_>) -> Result<(), DeployerError> {
        Ok(())
    }
}

struct ProxyPreset;

#[async_trait]
impl PresetBehavior for ProxyPreset {
    fn assets(&self) -> &'static [&'static str] {
        &["templates", "scripts", "docs"]
    }

    async fn post_steps(&self, _ctx: &PostStepContext<'_>) -> Result<(), DeployerError> {
        Ok(())
    }
}
