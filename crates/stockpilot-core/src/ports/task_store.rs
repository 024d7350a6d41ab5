//! TaskStore port - タスクレコードの正本（source of truth）
//!
//! Durable key-value persistence of `TaskRecord`s keyed by task id.
//!
//! # Contract
//! - `write` is a whole-record replace; there is no partial-field update.
//!   Callers do read-modify-write and must serialize their own writes per id.
//! - A successful `write` is visible to every later `read`, including after a
//!   process restart.
//! - Readers never observe a half-written record.

use async_trait::async_trait;

use crate::domain::{TaskId, TaskRecord, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {0} already exists")]
    Duplicate(TaskId),

    #[error("task {task_id} is '{status}'; only terminal tasks can be deleted")]
    NotTerminal { task_id: TaskId, status: TaskStatus },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record; fails with `Duplicate` if the id exists.
    async fn create(&self, record: &TaskRecord) -> Result<(), StoreError>;

    async fn read(&self, task_id: TaskId) -> Result<TaskRecord, StoreError>;

    /// Replace the whole record. The record must already exist.
    async fn write(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Remove a terminal record; fails with `NotTerminal` otherwise.
    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError>;

    /// Records of one owner, newest `created_at` first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TaskRecord>, StoreError>;

    /// Every record, newest first. Used for crash recovery.
    async fn list_all(&self) -> Result<Vec<TaskRecord>, StoreError>;
}

/// Newest first; ties broken by id (ULIDs sort by creation time).
pub(crate) fn sort_newest_first(records: &mut [TaskRecord]) {
    records.sort_by(|a, b| {
        b.timestamps
            .created_at
            .cmp(&a.timestamps.created_at)
            .then_with(|| b.task_id.cmp(&a.task_id))
    });
}
