//! Model catalog
//!
//! Read-only reference data. Each entry describes one provider/model
//! fragment that the config merger can inject into a gateway document.

use serde::{Deserialize, Serialize};

/// Priority tier of a model within the bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
}

/// A single provider/model catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    /// Short identifier used on the CLI and as the gateway-visible name
    pub model_id: &'static str,

    /// Human-readable display name
    pub display_name: &'static str,

    /// Model publisher
    pub publisher: &'static str,

    /// Provider route string understood by the gateway
    pub provider_route: &'static str,

    /// YAML fragment path relative to the source tree
    pub fragment_path: &'static str,

    /// Priority tier
    pub priority: Priority,
}

/// The full model catalog shipped with the configuration bundle
pub const MODEL_CATALOG: &[Model] = &[
    Model {
        model_id: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
        publisher: "Google",
        provider_route: "vertex_ai/gemini-2.5-flash",
        fragment_path: "templates/models/gemini-2.5-flash.yaml",
        priority: Priority::P1,
    },
    Model {
        model_id: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
        publisher: "Google",
        provider_route: "vertex_ai/gemini-2.5-pro",
        fragment_path: "templates/models/gemini-2.5-pro.yaml",
        priority: Priority::P1,
    },
    Model {
        model_id: "deepseek-r1",
        display_name: "DeepSeek R1",
        publisher: "DeepSeek",
        provider_route: "vertex_ai/deepseek-ai/deepseek-r1-0528-maas",
        fragment_path: "templates/models/deepseek-r1.yaml",
        priority: Priority::P2,
    },
    Model {
        model_id: "llama3-405b",
        display_name: "Llama 3 405B Instruct",
        publisher: "Meta",
        provider_route: "vertex_ai/meta/llama3-405b-instruct-maas",
        fragment_path: "templates/models/llama3-405b.yaml",
        priority: Priority::P2,
    },
    Model {
        model_id: "codestral",
        display_name: "Codestral",
        publisher: "Mistral",
        provider_route: "vertex_ai/codestral@latest",
        fragment_path: "templates/models/codestral.yaml",
        priority: Priority::P2,
    },
    Model {
        model_id: "qwen3-coder-480b",
        display_name: "Qwen3 Coder 480B",
        publisher: "Qwen",
        provider_route: "vertex_ai/qwen/qwen3-coder-480b-a35b-instruct-maas",
        fragment_path: "templates/models/qwen3-coder-480b.yaml",
        priority: Priority::P3,
    },
    Model {
        model_id: "qwen3-235b",
        display_name: "Qwen3 235B Instruct",
        publisher: "Qwen",
        provider_route: "vertex_ai/qwen/qwen3-235b-a22b-instruct-2507-maas",
        fragment_path: "templates/models/qwen3-235b.yaml",
        priority: Priority::P3,
    },
    Model {
        model_id: "gpt-oss-20b",
        display_name: "GPT-OSS 20B",
        publisher: "OpenAI",
        provider_route: "vertex_ai/openai/gpt-oss-20b-maas",
        fragment_path: "templates/models/gpt-oss-20b.yaml",
        priority: Priority::P3,
    },
];

/// Look up a catalog entry by model id
pub fn find(model_id: &str) -> Option<&'static Model> {
    MODEL_CATALOG.iter().find(|m| m.model_id == model_id)
}

/// Split a list of requested ids into known catalog entries and unknown names
pub fn partition_known(requested: &[String]) -> (Vec<&'static Model>, Vec<String>) {
    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for id in requested {
        match find(id) {
            Some(model) => known.push(model),
            None => unknown.push(id.clone()),
        }
    }
    (known, unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_unique() {
        let mut ids: Vec<_> = MODEL_CATALOG.iter().map(|m| m.model_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), MODEL_CATALOG.len());
    }

    #[test]
    fn test_find() {
        assert!(find("gemini-2.5-flash").is_some());
        assert!(find("not-a-real-model").is_none());
    }

    #[test]
    fn test_partition_known() {
        let requested = vec![
            "deepseek-r1".to_string(),
            "not-a-real-model".to_string(),
            "codestral".to_string(),
        ];
        let (known, unknown) = partition_known(&requested);
        assert_eq!(known.len(), 2);
        assert_eq!(unknown, vec!["not-a-real-model".to_string()]);
    }
}
