//! stockpilot-core
//!
//! Asynchronous orchestration of LLM stock-analysis tasks: submission,
//! retry/backoff with error classification, pause / resume / stop from
//! concurrent callers, and a durable task store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task record, outcome, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, LlmProvider, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（orchestrator, execution unit, control registry, retry policy）
//! - **impls**: 実装（FileTaskStore, OpenAiCompatibleProvider, ScriptedProvider など）
//! - **config**: `stockpilot.toml`
//! - **prompt**: `${key}` テンプレート

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod prompt;

pub use self::app::{Orchestrator, OrchestratorBuilder};
pub use self::config::StockpilotConfig;
