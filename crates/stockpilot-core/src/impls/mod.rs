//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FileTaskStore**: 1 タスク 1 JSON ファイルの正本（本番用）
//! - **InMemoryTaskStore**: テスト用の正本
//! - **OpenAiCompatibleProvider**: OpenAI 互換 chat-completions API
//! - **ScriptedProvider**: 決定的な偽 LLM（テスト・デモ用）

pub mod file_store;
pub mod inmem_store;
pub mod openai_compatible;
pub mod scripted;

// 主要な型を再エクスポート
pub use self::file_store::FileTaskStore;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::openai_compatible::OpenAiCompatibleProvider;
pub use self::scripted::{ScriptedProvider, Step};
