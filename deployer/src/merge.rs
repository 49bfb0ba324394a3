//! Configuration merging
//!
//! Combines a preset's base template with selected model fragments into a
//! single gateway document. The merger produces; the validation pipeline
//! judges the deployed result.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::catalog::model::Model;
use crate::errors::DeployerError;
use crate::filesys::file::File;

/// Merges base templates with model fragments
#[derive(Debug, Clone)]
pub struct ConfigMerger {
    source_dir: PathBuf,
}

impl ConfigMerger {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    /// Merge the base template with the selected models. An empty selection
    /// keeps the preset's default model list untouched (no-op merge).
    pub async fn merge(
        &self,
        template_file: &str,
        models: &[&'static Model],
    ) -> Result<Value, DeployerError> {
        let base_path = self.source_dir.join(template_file);
        let contents = File::new(&base_path).read_string().await.map_err(|_| {
            DeployerError::SourceMissing(format!(
                "base template not found at {}",
                base_path.display()
            ))
        })?;
        let mut document: Value = serde_yaml::from_str(&contents)?;

        if !document.is_mapping() {
            return Err(DeployerError::Merge(format!(
                "base template {} is not a YAML mapping",
                template_file
            )));
        }

        if models.is_empty() {
            debug!("empty model selection, keeping preset defaults unmodified");
            return Ok(document);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut entries = Vec::with_capacity(models.len());
        for model in models {
            if !seen.insert(model.model_id) {
                return Err(DeployerError::Merge(format!(
                    "duplicate model id in selection: {}",
                    model.model_id
                )));
            }
            entries.push(self.load_fragment(model).await?);
        }

        let mapping = document
            .as_mapping_mut()
            .ok_or_else(|| DeployerError::Merge("base template lost mapping shape".to_string()))?;
        mapping.insert(
            Value::String("model_list".to_string()),
            Value::Sequence(entries),
        );

        Ok(document)
    }

    /// Serialize a merged document. Output is deterministic for identical
    /// inputs, which keeps repeated installs byte-identical.
    pub fn to_yaml_string(document: &Value) -> Result<String, DeployerError> {
        Ok(serde_yaml::to_string(document)?)
    }

    /// Load the model's YAML fragment from the source tree, or synthesize
    /// one from catalog metadata when the bundle ships none.
    async fn load_fragment(&self, model: &'static Model) -> Result<Value, DeployerError> {
        let fragment_path = self.source_dir.join(model.fragment_path);
        if fragment_path.is_file() {
            let contents = File::new(&fragment_path).read_string().await?;
            let fragment: Value = serde_yaml::from_str(&contents)?;
            validate_fragment(&fragment, model, &fragment_path)?;
            return Ok(fragment);
        }
        debug!(
            "no fragment file for {}, synthesizing from catalog",
            model.model_id
        );
        Ok(synthesize_fragment(model))
    }
}

/// A fragment must be a mapping with a matching model_name
fn validate_fragment(
    fragment: &Value,
    model: &Model,
    path: &Path,
) -> Result<(), DeployerError> {
    if !fragment.is_mapping() {
        return Err(DeployerError::Merge(format!(
            "fragment {} is not a YAML mapping",
            path.display()
        )));
    }
    let name = fragment.get("model_name").and_then(Value::as_str);
    match name {
        Some(name) if name == model.model_id => Ok(()),
        Some(name) => Err(DeployerError::Merge(format!(
            "fragment {} declares model_name '{}', expected '{}'",
            path.display(),
            name,
            model.model_id
        ))),
        None => Err(DeployerError::Merge(format!(
            "fragment {} is missing model_name",
            path.display()
        ))),
    }
}

/// Build a model_list entry from catalog metadata alone
fn synthesize_fragment(model: &Model) -> Value {
    let mut params = Mapping::new();
    params.insert(
        Value::String("model".to_string()),
        Value::String(model.provider_route.to_string()),
    );
    if model.provider_route.starts_with("vertex_ai/") {
        params.insert(
            Value::String("vertex_project".to_string()),
            Value::String("os.environ/VERTEX_PROJECT_ID".to_string()),
        );
        params.insert(
            Value::String("vertex_location".to_string()),
            Value::String("os.environ/VERTEX_LOCATION".to_string()),
        );
    }

    let mut entry = Mapping::new();
    entry.insert(
        Value::String("model_name".to_string()),
        Value::String(model.model_id.to_string()),
    );
    entry.insert(
        Value::String("litellm_params".to_string()),
        Value::Mapping(params),
    );
    Value::Mapping(entry)
}

/// Extract the model names present in a merged document
pub fn model_names(document: &Value) -> Vec<String> {
    document
        .get("model_list")
        .and_then(Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(|entry| entry.get("model_name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model;

    const BASE_TEMPLATE: &str = "\
model_list:
  - model_name: gemini-2.5-flash
    litellm_params:
      model: vertex_ai/gemini-2.5-flash
  - model_name: gemini-2.5-pro
    litellm_params:
      model: vertex_ai/gemini-2.5-pro
litellm_settings:
  drop_params: true
general_settings:
  master_key: os.environ/LITELLM_MASTER_KEY
";

    fn write_source_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("templates")).unwrap();
        std::fs::write(
            dir.path().join("templates/litellm-basic.yaml"),
            BASE_TEMPLATE,
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_empty_selection_is_noop() {
        let src = write_source_tree();
        let merger = ConfigMerger::new(src.path());

        let document = merger
            .merge("templates/litellm-basic.yaml", &[])
            .await
            .unwrap();
        assert_eq!(
            model_names(&document),
            vec!["gemini-2.5-flash", "gemini-2.5-pro"]
        );
    }

    #[tokio::test]
    async fn test_selection_replaces_model_list() {
        let src = write_source_tree();
        let merger = ConfigMerger::new(src.path());
        let selection = vec![
            model::find("gemini-2.5-flash").unwrap(),
            model::find("deepseek-r1").unwrap(),
        ];

        let document = merger
            .merge("templates/litellm-basic.yaml", &selection)
            .await
            .unwrap();

        assert_eq!(
            model_names(&document),
            vec!["gemini-2.5-flash", "deepseek-r1"]
        );
        // Untouched sections survive the merge
        assert!(document.get("general_settings").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_selection_rejected() {
        let src = write_source_tree();
        let merger = ConfigMerger::new(src.path());
        let model = model::find("codestral").unwrap();

        let err = merger
            .merge("templates/litellm-basic.yaml", &[model, model])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployerError::Merge(_)));
    }

    #[tokio::test]
    async fn test_fragment_file_preferred_over_synthesis() {
        let src = write_source_tree();
        std::fs::create_dir_all(src.path().join("templates/models")).unwrap();
        std::fs::write(
            src.path().join("templates/models/codestral.yaml"),
            "model_name: codestral\nlitellm_params:\n  model: vertex_ai/codestral@latest\n  max_tokens: 4096\n",
        )
        .unwrap();

        let merger = ConfigMerger::new(src.path());
        let selection = vec![model::find("codestral").unwrap()];
        let document = merger
            .merge("templates/litellm-basic.yaml", &selection)
            .await
            .unwrap();

        let entry = &document.get("model_list").unwrap().as_sequence().unwrap()[0];
        assert_eq!(
            entry
                .get("litellm_params")
                .unwrap()
                .get("max_tokens")
                .and_then(Value::as_u64),
            Some(4096)
        );
    }

    #[tokio::test]
    async fn test_fragment_name_mismatch_rejected() {
        let src = write_source_tree();
        std::fs::create_dir_all(src.path().join("templates/models")).unwrap();
        std::fs::write(
            src.path().join("templates/models/codestral.yaml"),
            "model_name: other-model\nlitellm_params:\n  model: x\n",
        )
        .unwrap();

        let merger = ConfigMerger::new(src.path());
        let err = merger
            .merge(
                "templates/litellm-basic.yaml",
                &[model::find("codestral").unwrap()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployerError::Merge(_)));
    }

    #[tokio::test]
    async fn test_merge_is_deterministic() {
        let src = write_source_tree();
        let merger = ConfigMerger::new(src.path());
        let selection = vec![
            model::find("gemini-2.5-flash").unwrap(),
            model::find("deepseek-r1").unwrap(),
        ];

        let first = ConfigMerger::to_yaml_string(
            &merger
                .merge("templates/litellm-basic.yaml", &selection)
                .await
                .unwrap(),
        )
        .unwrap();
        let second = ConfigMerger::to_yaml_string(
            &merger
                .merge("templates/litellm-basic.yaml", &selection)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(first, second);
    }
}
