//! LlmProvider port - LLM 呼び出しの抽象化
//!
//! # Contract
//! - `generate` never returns `Err` and never panics on vendor errors; every
//!   failure is folded into `Outcome::Failure` with an `ErrorKind`.
//! - Implementations must not retry internally. Retries belong to the
//!   orchestrator's `RetryPolicy`.

use async_trait::async_trait;

use crate::domain::{Outcome, Subject};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Name under which the provider is registered.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// One provider call for one subject.
    ///
    /// `prompt` is already rendered; `subject` is passed along for providers
    /// that want its metadata (the scripted fake keys its script on it).
    async fn generate(&self, prompt: &str, subject: &Subject) -> Outcome;

    /// Cheap liveness probe used by `stockpilot-cli` before long runs.
    async fn test_connection(&self) -> bool {
        self.generate("ping", &Subject::new("ping")).await.is_success()
    }
}
