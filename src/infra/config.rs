// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,

    /// Models a task may reference by `id`.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub default_concurrency: usize,
    pub default_max_iterations: u32,
    /// Minimum interval between persisted partial stream updates.
    pub stream_flush_ms: u64,
    /// Per-call timeout handed to provider adapters.
    pub request_timeout_secs: u64,
    /// Extra attempts for calls failing with a transient provider error.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_concurrency: 3,
            default_max_iterations: 20,
            stream_flush_ms: 200,
            request_timeout_secs: 120,
            max_retries: 2,
            retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Identifier tasks use to reference this model.
    pub id: String,
    /// Model name sent to the API.
    pub model: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the key; takes precedence over `api_key`.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// The model returns a separate reasoning trace.
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.model)
    }

    /// Resolve the API key, preferring the environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.is_empty()))
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.engine.default_concurrency, 3);
        assert_eq!(c.engine.default_max_iterations, 20);
        assert_eq!(c.engine.stream_flush_ms, 200);
        assert_eq!(c.engine.max_retries, 2);
        assert!(c.models.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.default_concurrency, 3);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[engine]
default_concurrency = 5
default_max_iterations = 8
stream_flush_ms = 50
request_timeout_secs = 30

[[models]]
id = "target"
model = "qwen-plus-1127"
base_url = "https://dashscope.aliyuncs.com/compatible-mode/v1"
api_key_env = "QWEN_API_KEY"

[[models]]
id = "judge"
model = "qwen/qwen3-32b"
display_name = "Qwen3 32B"
base_url = "https://openrouter.ai/api/v1"
api_key = "sk-test"
reasoning = true
temperature = 0.2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.default_concurrency, 5);
        assert_eq!(config.engine.request_timeout_secs, 30);
        assert_eq!(config.engine.max_retries, 2);
        assert_eq!(config.models.len(), 2);

        let judge = config.model("judge").unwrap();
        assert!(judge.reasoning);
        assert_eq!(judge.display_name(), "Qwen3 32B");
        assert_eq!(judge.resolve_api_key().as_deref(), Some("sk-test"));

        let target = config.model("target").unwrap();
        assert!(!target.reasoning);
        assert_eq!(target.display_name(), "qwen-plus-1127");
        assert!(config.model("missing").is_none());
    }

    #[test]
    fn test_empty_api_key_is_none() {
        let m = ModelConfig {
            id: "m".into(),
            model: "m".into(),
            display_name: None,
            base_url: "http://localhost".into(),
            api_key: Some(String::new()),
            api_key_env: Some("PROMPTKOI_TEST_SURELY_UNSET_VAR".into()),
            reasoning: false,
            temperature: None,
            max_tokens: None,
        };
        assert!(m.resolve_api_key().is_none());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.engine.default_max_iterations,
            config.engine.default_max_iterations
        );
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
