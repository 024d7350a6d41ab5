//! OrchestratorBuilder - Orchestrator の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;
use std::time::Duration;

use crate::app::control::TaskControlRegistry;
use crate::app::orchestrator::{Orchestrator, Shared};
use crate::app::providers::{ProviderRegistry, ProviderRegistryError};
use crate::app::retry::RetryPolicy;
use crate::config::StockpilotConfig;
use crate::ports::{Clock, IdGenerator, LlmProvider, SystemClock, TaskStore, UlidGenerator};
use crate::prompt::DEFAULT_PROMPT_TEMPLATE;

/// Default pause / stop poll granularity.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// OrchestratorBuilder は Orchestrator を構築
///
/// # 使用例
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .store(Arc::new(FileTaskStore::open("data/tasks").await?))
///     .provider(Arc::new(ScriptedProvider::new("fake")))?
///     .expect_providers(&["fake"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_providers() で期待される provider 名を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn TaskStore>>,
    providers: ProviderRegistry,
    retry: Option<RetryPolicy>,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    prompt_template: Option<String>,
    expected_providers: Option<Vec<String>>,
}

/// BuildError は Orchestrator 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No task store configured.")]
    MissingStore,

    #[error("Missing providers: {0:?}. These providers were expected but not registered.")]
    MissingProviders(Vec<String>),

    #[error(transparent)]
    Provider(#[from] ProviderRegistryError),
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            providers: ProviderRegistry::new(),
            retry: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            clock: Arc::new(SystemClock),
            ids: None,
            prompt_template: None,
            expected_providers: None,
        }
    }

    /// Retry policy, poll interval, prompt template and providers from config.
    pub fn from_config(config: &StockpilotConfig) -> Result<Self, BuildError> {
        let mut builder = Self::new()
            .retry_policy(RetryPolicy::from_config(&config.retry))
            .poll_interval(config.poll_interval())
            .providers(ProviderRegistry::from_config(config)?);
        if let Some(template) = &config.prompt_template {
            builder = builder.prompt_template(template.clone());
        }
        Ok(builder)
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Provider を登録（名前の二重登録はエラー）
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Result<Self, ProviderRegistryError> {
        self.providers.register(provider)?;
        Ok(self)
    }

    /// Replace the whole provider registry.
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Template used when a submission doesn't bring its own.
    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    /// 期待される provider 名のリストを設定
    pub fn expect_providers(mut self, names: &[&str]) -> Self {
        self.expected_providers = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// # 検証
    /// - store が設定されているか
    /// - expect_providers() の名前が全て登録されているか
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        if let Some(expected) = &self.expected_providers {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !self.providers.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingProviders(missing));
            }
        }

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(self.clock.clone())));
        let shared = Shared::new(
            store,
            self.providers,
            TaskControlRegistry::new(self.clock.clone()),
            self.retry.unwrap_or_default(),
            self.clock,
            ids,
            self.poll_interval.max(Duration::from_millis(1)),
            self.prompt_template
                .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string()),
        );
        Ok(Orchestrator::from_shared(shared))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
