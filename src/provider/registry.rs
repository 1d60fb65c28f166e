// src/provider/registry.rs — Resolve task model references to live adapters

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::openai_compat::OpenAICompatProvider;
use super::retry::{RetryConfig, RetryModel};
use super::LanguageModel;
use crate::infra::config::Config;
use crate::infra::errors::OptimizerError;

/// Configured models keyed by the id tasks reference.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn LanguageModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build retrying adapters for every `[[models]]` entry. Entries without
    /// an API key are skipped with a warning so other models stay usable.
    pub fn from_config(config: &Config) -> Self {
        let timeout = Duration::from_secs(config.engine.request_timeout_secs);
        let retry = RetryConfig::new(
            config.engine.max_retries,
            Duration::from_millis(config.engine.retry_delay_ms),
        );
        let mut registry = Self::new();
        for cfg in &config.models {
            match OpenAICompatProvider::from_config(cfg, timeout) {
                Ok(provider) => registry.insert(
                    cfg.id.clone(),
                    Arc::new(RetryModel::new(Arc::new(provider), retry.clone())),
                ),
                Err(e) => tracing::warn!("Model '{}' unavailable: {}", cfg.id, e),
            }
        }
        registry
    }

    pub fn insert(&mut self, id: impl Into<String>, model: Arc<dyn LanguageModel>) {
        self.models.insert(id.into(), model);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LanguageModel>> {
        self.models.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.models.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Resolve an optional task reference for the given role ("target" or
    /// "optimization"), failing with a configuration error.
    pub fn resolve(
        &self,
        reference: Option<&str>,
        role: &str,
    ) -> Result<Arc<dyn LanguageModel>, OptimizerError> {
        let id = reference.ok_or_else(|| {
            OptimizerError::Configuration(format!("no {role} model assigned to task"))
        })?;
        self.get(id).ok_or_else(|| {
            OptimizerError::Configuration(format!("{role} model '{id}' is not configured"))
        })
    }
}
