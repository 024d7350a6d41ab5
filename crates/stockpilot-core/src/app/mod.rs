//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: Orchestrator の構築とワイヤリング
//! - **Orchestrator**: submit / pause / resume / stop / retry / 照会
//! - **execution**: 1 タスクを terminal まで進める実行ユニット
//! - **TaskControlRegistry**: 実行ユニットへの pause / stop 信号
//! - **RetryPolicy**: retry 判定と backoff
//! - **ProviderRegistry**: provider 名 → LlmProvider

pub mod builder;
pub mod control;
mod execution;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, OrchestratorBuilder, DEFAULT_POLL_INTERVAL};
pub use self::control::{ControlSnapshot, RegistryError, TaskControlRegistry};
pub use self::orchestrator::{Orchestrator, INTERRUPTED_MESSAGE};
pub use self::providers::{ProviderRegistry, ProviderRegistryError};
pub use self::retry::RetryPolicy;
pub use self::status::TaskCounts;
