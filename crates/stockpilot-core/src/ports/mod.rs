//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（ファイル、LLM API など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - LlmProvider は失敗を `Outcome` に畳み込む（例外を外に出さない）
//! - Clock / IdGenerator はテストで差し替える

pub mod clock;
pub mod id_generator;
pub mod provider;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::provider::LlmProvider;
pub use self::task_store::{StoreError, TaskStore};
