//! InMemoryTaskStore - テスト用の正本
//!
//! Not durable; use `FileTaskStore` for anything that must survive a restart.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::domain::{TaskId, TaskRecord};
use crate::ports::task_store::sort_newest_first;
use crate::ports::{StoreError, TaskStore};

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut records = self.write_lock();
        if records.contains_key(&record.task_id) {
            return Err(StoreError::Duplicate(record.task_id));
        }
        records.insert(record.task_id, record.clone());
        Ok(())
    }

    async fn read(&self, task_id: TaskId) -> Result<TaskRecord, StoreError> {
        self.read_lock()
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::NotFound(task_id))
    }

    async fn write(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut records = self.write_lock();
        match records.get_mut(&record.task_id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.task_id)),
        }
    }

    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError> {
        let mut records = self.write_lock();
        let record = records.get(&task_id).ok_or(StoreError::NotFound(task_id))?;
        if !record.is_terminal() {
            return Err(StoreError::NotTerminal {
                task_id,
                status: record.status,
            });
        }
        records.remove(&task_id);
        Ok(())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records: Vec<TaskRecord> = self
            .read_lock()
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records: Vec<TaskRecord> = self.read_lock().values().cloned().collect();
        sort_newest_first(&mut records);
        Ok(records)
    }
}
