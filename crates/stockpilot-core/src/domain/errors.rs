//! Errors - エラー型と分類
//!
//! - `ErrorKind`: provider failure の分類（retry 判定に使う閉じた集合）
//! - `TaskError`: 外部呼び出し（submit / pause / resume / stop / retry）が同期的に返すエラー

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskStatus;
use crate::app::control::RegistryError;
use crate::ports::task_store::StoreError;

/// Classification of a provider failure, independent of vendor error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    Auth,
    Timeout,
    Parse,
    Api,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Parse => "parse",
            ErrorKind::Api => "api",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control operation named in `TaskError::InvalidState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Pause,
    Resume,
    Stop,
    Retry,
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlOp::Pause => "pause",
            ControlOp::Resume => "resume",
            ControlOp::Stop => "stop",
            ControlOp::Retry => "retry",
        })
    }
}

/// Errors surfaced synchronously to callers of the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cannot {op} task {task_id} in status '{status}'")]
    InvalidState {
        task_id: TaskId,
        status: TaskStatus,
        op: ControlOp,
    },

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(task_id) => TaskError::NotFound(task_id),
            other => TaskError::Store(other),
        }
    }
}

impl TaskError {
    pub fn validation(message: impl Into<String>) -> Self {
        TaskError::Validation(message.into())
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, TaskError::InvalidState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn error_kind_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(s, "\"rate_limit\"");
        assert_eq!(ErrorKind::RateLimit.to_string(), "rate_limit");
    }

    #[test]
    fn store_not_found_becomes_task_not_found() {
        let id = TaskId::from_ulid(Ulid::new());
        let err: TaskError = StoreError::NotFound(id).into();
        assert!(matches!(err, TaskError::NotFound(got) if got == id));
    }

    #[test]
    fn invalid_state_message_names_op_and_status() {
        let id = TaskId::from_ulid(Ulid::new());
        let err = TaskError::InvalidState {
            task_id: id,
            status: TaskStatus::Completed,
            op: ControlOp::Retry,
        };
        let msg = err.to_string();
        assert!(msg.contains("retry"));
        assert!(msg.contains("completed"));
        assert!(err.is_invalid_state());
    }
}
