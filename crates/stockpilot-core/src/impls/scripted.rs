//! ScriptedProvider - 決定的な偽 LLM（テスト・デモ用）
//!
//! Each subject replays a script of steps, then succeeds forever.
//! Subjects without an explicit script replay the default script, so
//! `ScriptedProvider::new("fake").with_default_script(fail 2x network)` gives
//! "fails twice, then succeeds" for every subject.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::domain::{ErrorKind, Outcome, Subject};
use crate::ports::LlmProvider;

/// One scripted provider call.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(Outcome),
    /// Panic inside `generate`, to exercise the caller's panic isolation.
    Panic(String),
}

impl Step {
    pub fn fail(kind: ErrorKind) -> Self {
        Step::Respond(Outcome::failure(kind, format!("scripted {kind} failure")))
    }

    pub fn succeed(content: impl Into<String>) -> Self {
        Step::Respond(Outcome::success(content))
    }
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, VecDeque<Step>>,
    calls: HashMap<String, u32>,
}

pub struct ScriptedProvider {
    name: String,
    model: String,
    latency: Duration,
    default_script: Vec<Step>,
    state: Mutex<State>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: "scripted".to_string(),
            latency: Duration::ZERO,
            default_script: Vec::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// `fail_first` failures of `fail_kind`, then success, for every subject.
    pub fn from_config(name: impl Into<String>, config: &ProviderConfig) -> Self {
        let mut provider = Self::new(name)
            .with_latency(Duration::from_millis(config.latency_ms))
            .with_default_script((0..config.fail_first).map(|_| Step::fail(config.fail_kind)).collect());
        if !config.model.is_empty() {
            provider.model = config.model.clone();
        }
        provider
    }

    /// Sleep this long on every call before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_default_script(mut self, steps: Vec<Step>) -> Self {
        self.default_script = steps;
        self
    }

    pub fn with_script(self, subject: impl Into<String>, steps: Vec<Step>) -> Self {
        self.lock().scripts.insert(subject.into(), steps.into());
        self
    }

    /// Shorthand: `times` failures of `kind`, then success.
    pub fn failing(self, subject: impl Into<String>, times: u32, kind: ErrorKind) -> Self {
        self.with_script(subject, (0..times).map(|_| Step::fail(kind)).collect())
    }

    /// Number of `generate` calls made for `subject`.
    pub fn calls(&self, subject: &str) -> u32 {
        self.lock().calls.get(subject).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.lock().calls.values().sum()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_step(&self, key: &str) -> Option<Step> {
        let mut state = self.lock();
        *state.calls.entry(key.to_string()).or_default() += 1;
        let default_script = &self.default_script;
        state
            .scripts
            .entry(key.to_string())
            .or_insert_with(|| default_script.iter().cloned().collect())
            .pop_front()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, subject: &Subject) -> Outcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.next_step(&subject.key) {
            Some(Step::Respond(outcome)) => outcome,
            Some(Step::Panic(message)) => panic!("{message}"),
            None => Outcome::success(format!("analysis of {}", subject.key))
                .with_tokens(Some(prompt.len() as u64))
                .with_model(self.model.clone()),
        }
    }

    async fn test_connection(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_then_succeeds() {
        let provider = ScriptedProvider::new("fake").failing("A", 2, ErrorKind::Network);
        let subject = Subject::new("A");

        assert_eq!(provider.generate("p", &subject).await.error_kind(), Some(ErrorKind::Network));
        assert_eq!(provider.generate("p", &subject).await.error_kind(), Some(ErrorKind::Network));
        assert!(provider.generate("p", &subject).await.is_success());
        assert!(provider.generate("p", &subject).await.is_success());
        assert_eq!(provider.calls("A"), 4);
    }

    #[tokio::test]
    async fn default_script_applies_per_subject() {
        let provider = ScriptedProvider::new("fake").with_default_script(vec![Step::fail(ErrorKind::Timeout)]);

        assert!(!provider.generate("p", &Subject::new("A")).await.is_success());
        assert!(!provider.generate("p", &Subject::new("B")).await.is_success());
        assert!(provider.generate("p", &Subject::new("A")).await.is_success());
        assert_eq!(provider.total_calls(), 3);
    }

    #[tokio::test]
    async fn from_config_uses_fail_first() {
        let config = ProviderConfig {
            fail_first: 1,
            fail_kind: ErrorKind::RateLimit,
            ..ProviderConfig::default()
        };
        let provider = ScriptedProvider::from_config("fake", &config);
        let outcome = provider.generate("p", &Subject::new("X")).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::RateLimit));
        assert!(provider.generate("p", &Subject::new("X")).await.is_success());
    }
}
