//! Environment variable resolution
//!
//! Discovers configuration values from ranked sources. An entry already
//! present in the target's `.env` is never replaced by a lower-priority
//! source, including the process environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::utils;

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvSource {
    /// Explicit `--var KEY=VALUE` or a dedicated CLI flag
    CliFlag,
    /// `.env` already present in the target directory
    TargetEnvFile,
    /// Current process environment
    ShellEnv,
    /// `~/.bashrc`, `~/.zshrc` or `~/.profile`
    ShellProfile,
    /// Provider-specific probe (e.g. the active gcloud project)
    ProviderProbe,
    /// Freshly generated placeholder secret
    Generated,
}

/// Secrets that must exist even when no other source provides them
const GENERATED_SECRET_VARS: &[&str] = &["LITELLM_MASTER_KEY"];

/// Shell profile files scanned for `export KEY=VALUE` lines, in order
const SHELL_PROFILES: &[&str] = &[".bashrc", ".zshrc", ".profile"];

/// A required/optional variable plus its resolved value and source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
    pub source: EnvSource,
    pub required: bool,
    pub secret: bool,
}

impl EnvironmentVariable {
    /// Value safe to print: secrets are truncated
    pub fn display_value(&self) -> String {
        if !self.secret {
            return self.value.clone();
        }
        // Truncate by characters, not bytes; values are user input
        let mut chars = self.value.chars();
        let prefix: String = chars.by_ref().take(8).collect();
        if chars.next().is_some() {
            format!("{}...", prefix)
        } else {
            "***".to_string()
        }
    }
}

/// Variables holding credentials are never printed in full
fn is_secret(name: &str) -> bool {
    ["KEY", "TOKEN", "SECRET", "PASSWORD"]
        .iter()
        .any(|marker| name.contains(marker))
}

/// Resolves environment variables from ranked sources
#[derive(Debug, Clone)]
pub struct EnvResolver {
    overrides: BTreeMap<String, String>,
    home_dir: Option<PathBuf>,
    /// `None` reads the process environment; tests inject a fixed map
    shell_env: Option<BTreeMap<String, String>>,
    probes_enabled: bool,
}

impl EnvResolver {
    /// Create a resolver with explicit CLI overrides as the top-ranked source
    pub fn new(overrides: BTreeMap<String, String>) -> Self {
        Self {
            overrides,
            home_dir: utils::home_dir(),
            shell_env: None,
            probes_enabled: true,
        }
    }

    /// Disable subprocess probes (used by tests and dry runs)
    pub fn without_probes(mut self) -> Self {
        self.probes_enabled = false;
        self
    }

    /// Override the home directory scanned for shell profiles
    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    /// Replace the process-environment lookup with a fixed map
    pub fn with_shell_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.shell_env = Some(env);
        self
    }

    /// Resolve every requested variable. Required variables that stay
    /// unresolved are absent from the returned map; the validation gate
    /// decides whether that is fatal for the preset.
    pub async fn resolve(
        &self,
        required: &[&str],
        optional: &[&str],
        existing_env: Option<&Path>,
    ) -> Result<BTreeMap<String, EnvironmentVariable>, DeployerError> {
        let target_env = match existing_env {
            Some(path) if path.is_file() => parse_env_file(&File::new(path).read_string().await?),
            _ => BTreeMap::new(),
        };
        let profile_env = self.load_shell_profiles().await;

        let mut resolved = BTreeMap::new();
        let names: Vec<(&str, bool)> = required
            .iter()
            .map(|n| (*n, true))
            .chain(optional.iter().map(|n| (*n, false)))
            .chain(
                self.overrides
                    .keys()
                    .filter(|k| {
                        !required.contains(&k.as_str()) && !optional.contains(&k.as_str())
                    })
                    .map(|k| (k.as_str(), false)),
            )
            .collect();

        for (name, is_required) in names {
            let entry = self
                .resolve_one(name, is_required, &target_env, &profile_env)
                .await;
            match entry {
                Some(variable) => {
                    debug!(
                        "resolved {} from {:?} ({})",
                        name,
                        variable.source,
                        variable.display_value()
                    );
                    resolved.insert(name.to_string(), variable);
                }
                None if is_required => {
                    warn!("required variable {} could not be resolved", name);
                }
                None => {}
            }
        }

        Ok(resolved)
    }

    async fn resolve_one(
        &self,
        name: &str,
        required: bool,
        target_env: &BTreeMap<String, String>,
        profile_env: &BTreeMap<String, String>,
    ) -> Option<EnvironmentVariable> {
        let make = |value: String, source: EnvSource| EnvironmentVariable {
            name: name.to_string(),
            value,
            source,
            required,
            secret: is_secret(name),
        };

        if let Some(value) = self.overrides.get(name) {
            return Some(make(value.clone(), EnvSource::CliFlag));
        }
        // An existing target .env outranks the process environment: a value
        // the user already deployed with must survive re-runs unchanged.
        // An empty value is a placeholder from a previous render, not a
        // choice, so it does not latch.
        if let Some(value) = target_env.get(name) {
            if !value.is_empty() {
                return Some(make(value.clone(), EnvSource::TargetEnvFile));
            }
        }
        let shell_value = match &self.shell_env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        if let Some(value) = shell_value {
            if !value.is_empty() {
                return Some(make(value, EnvSource::ShellEnv));
            }
        }
        if let Some(value) = profile_env.get(name) {
            return Some(make(value.clone(), EnvSource::ShellProfile));
        }
        if let Some(value) = self.probe(name).await {
            return Some(make(value, EnvSource::ProviderProbe));
        }
        if required && GENERATED_SECRET_VARS.contains(&name) {
            let generated = format!("sk-{}", uuid::Uuid::new_v4().simple());
            return Some(make(generated, EnvSource::Generated));
        }
        None
    }

    async fn load_shell_profiles(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        let Some(home) = &self.home_dir else {
            return merged;
        };
        for profile in SHELL_PROFILES {
            let path = home.join(profile);
            let Ok(contents) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            for (key, value) in parse_profile(&contents) {
                // First profile that defines a name wins
                merged.entry(key).or_insert(value);
            }
        }
        merged
    }

    /// Provider-specific fallback probes
    async fn probe(&self, name: &str) -> Option<String> {
        if !self.probes_enabled {
            return None;
        }
        match name {
            "VERTEX_PROJECT_ID" => probe_gcloud_project().await,
            _ => None,
        }
    }
}

/// Query the installed cloud CLI for its active project
async fn probe_gcloud_project() -> Option<String> {
    let output = Command::new("gcloud")
        .args(["config", "get-value", "project"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let project = String::from_utf8(output.stdout).ok()?.trim().to_string();
    if project.is_empty() || project == "(unset)" {
        return None;
    }
    debug!("gcloud probe found active project {}", project);
    Some(project)
}

/// Parse `KEY=VALUE` lines of a `.env` file
pub fn parse_env_file(contents: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            map.insert(key.to_string(), strip_quotes(value.trim()).to_string());
        }
    }
    map
}

/// Parse `export KEY=VALUE` assignments from a shell profile. Values that
/// need shell evaluation are skipped.
fn parse_profile(contents: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("export ") else {
            continue;
        };
        let Some((key, value)) = rest.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = strip_quotes(value.trim());
        if key.is_empty() || value.contains('$') || value.contains('`') {
            continue;
        }
        vars.push((key.to_string(), value.to_string()));
    }
    vars
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Render resolved variables as `.env` content, sorted by name. Required
/// names that stayed unresolved are emitted with empty values, so the file
/// always lists everything the deployment expects to be filled in.
pub fn render_env_file(
    variables: &BTreeMap<String, EnvironmentVariable>,
    required: &[&str],
) -> String {
    let mut lines: BTreeMap<&str, &str> = required.iter().map(|name| (*name, "")).collect();
    for variable in variables.values() {
        lines.insert(variable.name.as_str(), variable.value.as_str());
    }

    let mut out = String::from("# Managed by gwdeploy. Edit values as needed; re-runs keep them.\n");
    for (name, value) in lines {
        out.push_str(&format!("{}={}\n", name, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_file() {
        let parsed = parse_env_file(
            "# comment\nFOO=bar\nexport QUOTED=\"a b\"\n\nEMPTY=\nBAD LINE\n",
        );
        assert_eq!(parsed.get("FOO").unwrap(), "bar");
        assert_eq!(parsed.get("QUOTED").unwrap(), "a b");
        assert_eq!(parsed.get("EMPTY").unwrap(), "");
        assert!(!parsed.contains_key("BAD LINE"));
    }

    #[test]
    fn test_parse_profile_skips_shell_expansion() {
        let vars = parse_profile(
            "export PLAIN=value\nexport REF=$HOME/bin\nexport CMD=`id -u`\nALIAS=nope\n",
        );
        assert_eq!(vars, vec![("PLAIN".to_string(), "value".to_string())]);
    }

    fn secret(value: &str) -> EnvironmentVariable {
        EnvironmentVariable {
            name: "LITELLM_MASTER_KEY".to_string(),
            value: value.to_string(),
            source: EnvSource::Generated,
            required: true,
            secret: true,
        }
    }

    #[test]
    fn test_secret_masking() {
        assert_eq!(secret("sk-0123456789abcdef").display_value(), "sk-01234...");
        assert_eq!(secret("short").display_value(), "***");
    }

    #[test]
    fn test_secret_masking_multibyte() {
        // The 8th character boundary falls inside a multibyte sequence
        assert_eq!(secret("sk-тайный-ключ").display_value(), "sk-тайны...");
        assert_eq!(secret("ключ").display_value(), "***");
    }

    #[tokio::test]
    async fn test_target_env_file_outranks_shell_env() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "VERTEX_PROJECT_ID=from-dotenv\n").unwrap();

        let mut shell = BTreeMap::new();
        shell.insert("VERTEX_PROJECT_ID".to_string(), "from-shell".to_string());

        let resolver = EnvResolver::new(BTreeMap::new())
            .without_probes()
            .with_home_dir(dir.path())
            .with_shell_env(shell);
        let resolved = resolver
            .resolve(&["VERTEX_PROJECT_ID"], &[], Some(&env_path))
            .await
            .unwrap();

        let variable = resolved.get("VERTEX_PROJECT_ID").unwrap();
        assert_eq!(variable.value, "from-dotenv");
        assert_eq!(variable.source, EnvSource::TargetEnvFile);
    }

    #[tokio::test]
    async fn test_empty_env_file_value_does_not_latch() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "VERTEX_PROJECT_ID=\n").unwrap();

        let mut shell = BTreeMap::new();
        shell.insert("VERTEX_PROJECT_ID".to_string(), "real-project".to_string());

        let resolver = EnvResolver::new(BTreeMap::new())
            .without_probes()
            .with_home_dir(dir.path())
            .with_shell_env(shell);
        let resolved = resolver
            .resolve(&["VERTEX_PROJECT_ID"], &[], Some(&env_path))
            .await
            .unwrap();

        let variable = resolved.get("VERTEX_PROJECT_ID").unwrap();
        assert_eq!(variable.value, "real-project");
        assert_eq!(variable.source, EnvSource::ShellEnv);
    }

    #[tokio::test]
    async fn test_cli_flag_outranks_everything() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "VERTEX_LOCATION=europe-west1\n").unwrap();

        let mut overrides = BTreeMap::new();
        overrides.insert("VERTEX_LOCATION".to_string(), "us-central1".to_string());

        let resolver = EnvResolver::new(overrides)
            .without_probes()
            .with_home_dir(dir.path());
        let resolved = resolver
            .resolve(&["VERTEX_LOCATION"], &[], Some(&env_path))
            .await
            .unwrap();

        let variable = resolved.get("VERTEX_LOCATION").unwrap();
        assert_eq!(variable.value, "us-central1");
        assert_eq!(variable.source, EnvSource::CliFlag);
    }

    #[tokio::test]
    async fn test_master_key_generated_when_unset() {
        let dir = tempfile::tempdir().unwrap();

        let resolver = EnvResolver::new(BTreeMap::new())
            .without_probes()
            .with_home_dir(dir.path())
            .with_shell_env(BTreeMap::new());
        let resolved = resolver
            .resolve(&["LITELLM_MASTER_KEY"], &[], None)
            .await
            .unwrap();

        let variable = resolved.get("LITELLM_MASTER_KEY").unwrap();
        assert!(variable.value.starts_with("sk-"));
        assert_eq!(variable.source, EnvSource::Generated);
        assert!(variable.secret);
    }

    #[tokio::test]
    async fn test_shell_profile_source() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join(".bashrc"),
            "export GWDEPLOY_TEST_PROFILE_VAR=from-bashrc\n",
        )
        .unwrap();

        let resolver = EnvResolver::new(BTreeMap::new())
            .without_probes()
            .with_home_dir(home.path())
            .with_shell_env(BTreeMap::new());
        let resolved = resolver
            .resolve(&["GWDEPLOY_TEST_PROFILE_VAR"], &[], None)
            .await
            .unwrap();

        let variable = resolved.get("GWDEPLOY_TEST_PROFILE_VAR").unwrap();
        assert_eq!(variable.value, "from-bashrc");
        assert_eq!(variable.source, EnvSource::ShellProfile);
    }

    #[test]
    fn test_render_env_file_sorted() {
        let mut map = BTreeMap::new();
        for (name, value) in [("B_VAR", "2"), ("A_VAR", "1")] {
            map.insert(
                name.to_string(),
                EnvironmentVariable {
                    name: name.to_string(),
                    value: value.to_string(),
                    source: EnvSource::ShellEnv,
                    required: false,
                    secret: false,
                },
            );
        }
        let rendered = render_env_file(&map, &[]);
        let a = rendered.find("A_VAR=1").unwrap();
        let b = rendered.find("B_VAR=2").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_render_env_file_lists_unresolved_required() {
        let rendered = render_env_file(&BTreeMap::new(), &["VERTEX_PROJECT_ID", "VERTEX_LOCATION"]);
        assert!(rendered.contains("VERTEX_PROJECT_ID=\n"));
        assert!(rendered.contains("VERTEX_LOCATION=\n"));
    }
}
