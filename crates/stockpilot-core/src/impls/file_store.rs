//! FileTaskStore - 1 タスク 1 JSON ファイルの正本
//!
//! Layout: `<root>/task-<ULID>.json`.
//!
//! # Atomicity
//! - Every write goes to a unique temp file, is fsynced, then renamed over the
//!   target, so readers see either the old or the new record, never a torn one.
//! - `create` hard-links the temp file into place, which fails atomically if
//!   the id already exists.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

use crate::domain::{TaskId, TaskRecord};
use crate::ports::task_store::sort_newest_first;
use crate::ports::{StoreError, TaskStore};

const RECORD_EXT: &str = "json";

pub struct FileTaskStore {
    root: PathBuf,
}

impl FileTaskStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, task_id: TaskId) -> PathBuf {
        self.root.join(format!("{task_id}.{RECORD_EXT}"))
    }

    fn temp_path_for(&self, task_id: TaskId) -> PathBuf {
        self.root.join(format!(".{task_id}.{}.tmp", Ulid::new()))
    }

    /// Serialize `record` into a fresh, fsynced temp file.
    async fn write_temp(&self, record: &TaskRecord) -> Result<PathBuf, StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let temp = self.temp_path_for(record.task_id);
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        Ok(temp)
    }

    async fn read_path(&self, path: &Path) -> Result<TaskRecord, StoreError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn load_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match self.read_path(&path).await {
                Ok(record) => records.push(record),
                // deleted between read_dir and read
                Err(StoreError::Io(e)) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable task record");
                }
            }
        }
        sort_newest_first(&mut records);
        Ok(records)
    }
}

fn not_found_as(task_id: TaskId) -> impl Fn(StoreError) -> StoreError {
    move |err| match err {
        StoreError::Io(e) if e.kind() == IoErrorKind::NotFound => StoreError::NotFound(task_id),
        other => other,
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let target = self.path_for(record.task_id);
        let temp = self.write_temp(record).await?;
        let linked = tokio::fs::hard_link(&temp, &target).await;
        tokio::fs::remove_file(&temp).await.ok();
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Err(StoreError::Duplicate(record.task_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, task_id: TaskId) -> Result<TaskRecord, StoreError> {
        self.read_path(&self.path_for(task_id))
            .await
            .map_err(not_found_as(task_id))
    }

    async fn write(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let target = self.path_for(record.task_id);
        if !tokio::fs::try_exists(&target).await? {
            return Err(StoreError::NotFound(record.task_id));
        }
        let temp = self.write_temp(record).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            tokio::fs::remove_file(&temp).await.ok();
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError> {
        let record = self.read(task_id).await?;
        if !record.is_terminal() {
            return Err(StoreError::NotTerminal {
                task_id,
                status: record.status,
            });
        }
        tokio::fs::remove_file(self.path_for(task_id))
            .await
            .map_err(|e| not_found_as(task_id)(e.into()))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records = self.load_all().await?;
        records.retain(|r| r.owner_id == owner_id);
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.load_all().await
    }
}
