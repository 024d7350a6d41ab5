//! ProviderRegistry - provider 名から LlmProvider への対応表
//!
//! # 学習ポイント
//! - HashMap での trait object の管理
//! - 設定からの構築（factory）と二重登録の拒否

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ProviderKind, StockpilotConfig};
use crate::impls::{OpenAiCompatibleProvider, ScriptedProvider};
use crate::ports::LlmProvider;

#[derive(Debug, thiserror::Error)]
pub enum ProviderRegistryError {
    #[error("provider '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("failed to build HTTP client for provider '{name}': {source}")]
    HttpClient {
        name: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every `[providers.<name>]` entry of the config.
    pub fn from_config(config: &StockpilotConfig) -> Result<Self, ProviderRegistryError> {
        let mut registry = Self::new();
        for (name, provider_config) in &config.providers {
            let provider: Arc<dyn LlmProvider> = match provider_config.kind {
                ProviderKind::OpenaiCompatible => {
                    if provider_config.resolve_api_key().is_none() {
                        tracing::warn!(provider = %name, "no API key configured; calls will fail with auth");
                    }
                    let provider = OpenAiCompatibleProvider::new(name.clone(), provider_config).map_err(|source| {
                        ProviderRegistryError::HttpClient {
                            name: name.clone(),
                            source,
                        }
                    })?;
                    Arc::new(provider)
                }
                ProviderKind::Scripted => Arc::new(ScriptedProvider::from_config(name.clone(), provider_config)),
            };
            registry.register(provider)?;
        }
        Ok(registry)
    }

    /// Register under `provider.name()`.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) -> Result<(), ProviderRegistryError> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(ProviderRegistryError::AlreadyRegistered(name));
        }
        tracing::debug!(provider = %name, model = %provider.model(), "provider registered");
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    #[test]
    fn register_and_get() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("fake"))).unwrap();
        assert!(registry.get("fake").is_some());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("fake"))).unwrap();
        let result = registry.register(Arc::new(ScriptedProvider::new("fake")));
        assert!(matches!(result, Err(ProviderRegistryError::AlreadyRegistered(name)) if name == "fake"));
    }

    #[test]
    fn from_config_builds_every_entry() {
        let mut config = StockpilotConfig::default();
        config.providers.insert(
            "deepseek".to_string(),
            ProviderConfig {
                base_url: Some("http://127.0.0.1:9/v1/chat/completions".to_string()),
                model: "deepseek-chat".to_string(),
                ..ProviderConfig::default()
            },
        );
        config.providers.insert(
            "fake".to_string(),
            ProviderConfig {
                kind: ProviderKind::Scripted,
                ..ProviderConfig::default()
            },
        );

        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["deepseek".to_string(), "fake".to_string()]);
        assert_eq!(registry.get("deepseek").unwrap().model(), "deepseek-chat");
    }
}
