//! Host application settings patching
//!
//! The enterprise preset points the host application at the deployed
//! gateway by patching its JSON settings file. Only the keys this tool
//! owns are written (last-write-wins on those keys); everything else in
//! the file is left untouched.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::utils;

/// Keys owned by this tool inside the host settings `env` object
const OWNED_ENDPOINT_KEY: &str = "ANTHROPIC_BASE_URL";
const OWNED_TOKEN_KEY: &str = "ANTHROPIC_AUTH_TOKEN";

/// The values to patch into the host settings
#[derive(Debug, Clone)]
pub struct SettingsPatch {
    pub gateway_url: String,
    pub auth_token: Option<String>,
}

/// Default host settings location
pub fn default_settings_path() -> Option<PathBuf> {
    utils::home_dir().map(|home| home.join(".claude").join("settings.json"))
}

/// Patch the host settings file: backup before write, re-parse after
/// write, revert to the backup if the written file fails to parse.
pub async fn patch_settings(path: &Path, patch: &SettingsPatch) -> Result<(), DeployerError> {
    let settings_file = File::new(path);
    let original: Option<String> = if settings_file.exists().await {
        Some(settings_file.read_string().await?)
    } else {
        None
    };

    let mut document: Value = match &original {
        Some(contents) => serde_json::from_str(contents).map_err(|e| {
            DeployerError::Validation(format!(
                "existing settings file {} is not valid JSON: {}",
                path.display(),
                e
            ))
        })?,
        None => json!({}),
    };

    if !document.is_object() {
        return Err(DeployerError::Validation(format!(
            "settings file {} must contain a JSON object",
            path.display()
        )));
    }

    let backup_path = path.with_extension("json.bak");
    if let Some(contents) = &original {
        File::new(&backup_path).write_atomic(contents.as_bytes()).await?;
        debug!("settings backup written to {}", backup_path.display());
    }

    let env = document
        .as_object_mut()
        .and_then(|obj| {
            if !obj.contains_key("env") {
                obj.insert("env".to_string(), json!({}));
            }
            obj.get_mut("env")
        })
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            DeployerError::Validation(format!(
                "settings file {} has a non-object 'env' section",
                path.display()
            ))
        })?;

    env.insert(
        OWNED_ENDPOINT_KEY.to_string(),
        Value::String(patch.gateway_url.clone()),
    );
    match &patch.auth_token {
        Some(token) => {
            env.insert(OWNED_TOKEN_KEY.to_string(), Value::String(token.clone()));
        }
        None => {}
    }

    let rendered = serde_json::to_string_pretty(&document)?;
    settings_file.write_atomic(rendered.as_bytes()).await?;

    // Validate the write landed as parseable JSON; revert on failure
    let reread = settings_file.read_string().await?;
    if serde_json::from_str::<Value>(&reread).is_err() {
        warn!("settings file corrupt after patch, reverting");
        if let Some(contents) = &original {
            settings_file.write_atomic(contents.as_bytes()).await?;
        } else {
            settings_file.delete().await?;
        }
        return Err(DeployerError::Validation(format!(
            "settings patch to {} did not survive a re-parse and was reverted",
            path.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_patch_preserves_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"theme": "dark", "env": {"EDITOR": "vim", "ANTHROPIC_BASE_URL": "http://old:4000"}}"#,
        )
        .unwrap();

        let patch = SettingsPatch {
            gateway_url: "http://localhost:4000".to_string(),
            auth_token: Some("sk-token".to_string()),
        };
        patch_settings(&path, &patch).await.unwrap();

        let document: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["theme"], "dark");
        assert_eq!(document["env"]["EDITOR"], "vim");
        assert_eq!(document["env"]["ANTHROPIC_BASE_URL"], "http://localhost:4000");
        assert_eq!(document["env"]["ANTHROPIC_AUTH_TOKEN"], "sk-token");

        // Backup of the pre-patch state exists
        assert!(path.with_extension("json.bak").exists());
    }

    #[tokio::test]
    async fn test_patch_creates_file_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let patch = SettingsPatch {
            gateway_url: "http://localhost:4000".to_string(),
            auth_token: None,
        };
        patch_settings(&path, &patch).await.unwrap();

        let document: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["env"]["ANTHROPIC_BASE_URL"], "http://localhost:4000");
        assert!(document["env"].get("ANTHROPIC_AUTH_TOKEN").is_none());
    }

    #[tokio::test]
    async fn test_patch_rejects_invalid_existing_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let patch = SettingsPatch {
            gateway_url: "http://localhost:4000".to_string(),
            auth_token: None,
        };
        let err = patch_settings(&path, &patch).await.unwrap_err();
        assert!(matches!(err, DeployerError::Validation(_)));

        // Original content untouched
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
