//! Orchestrator - タスクの受付・制御・照会
//!
//! # 学習ポイント
//! - submit は非同期境界: レコード作成 + handle 登録 + 実行ユニット起動まで行って即 return
//! - タスクごとの async Mutex で read-modify-write を直列化（single writer per task id）
//! - 外部の pause / resume / stop は status と control registry だけを触る
//!
//! # Degraded fallback
//! When no control handle exists (the execution unit already finished, or the
//! process restarted), pause / resume / stop still update the persisted status.
//! This is best-effort: a resumed record with no execution unit stays `running`
//! until `recover_interrupted` marks it failed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::app::control::TaskControlRegistry;
use crate::app::execution;
use crate::app::providers::ProviderRegistry;
use crate::app::retry::RetryPolicy;
use crate::app::status::TaskCounts;
use crate::domain::{ControlOp, SubmitRequest, TaskError, TaskId, TaskKind, TaskRecord, TaskStatus};
use crate::ports::{Clock, IdGenerator, StoreError, TaskStore};

/// `final_error` of records whose execution unit was lost.
pub const INTERRUPTED_MESSAGE: &str = "interrupted: execution unit lost (process restart)";

/// State shared by the orchestrator handle and its execution units.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) providers: ProviderRegistry,
    pub(crate) registry: TaskControlRegistry,
    pub(crate) retry: RetryPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) poll_interval: Duration,
    pub(crate) prompt_template: String,
    locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Shared {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        providers: ProviderRegistry,
        registry: TaskControlRegistry,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        poll_interval: Duration,
        prompt_template: String,
    ) -> Self {
        Self {
            store,
            providers,
            registry,
            retry,
            clock,
            ids,
            poll_interval,
            prompt_template,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Exclusive write access to one task's record.
    pub(crate) async fn lock_task(&self, task_id: TaskId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // entries nobody holds or waits on can go
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks.entry(task_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Re-read the record under the task lock and apply `f`, unless the record
    /// is already terminal. Returns the written record, or `None` if skipped.
    pub(crate) async fn update_record<F>(&self, task_id: TaskId, f: F) -> Result<Option<TaskRecord>, StoreError>
    where
        F: FnOnce(&mut TaskRecord, DateTime<Utc>) + Send,
    {
        let _guard = self.lock_task(task_id).await;
        let mut record = self.store.read(task_id).await?;
        if record.is_terminal() {
            return Ok(None);
        }
        f(&mut record, self.now());
        self.store.write(&record).await?;
        Ok(Some(record))
    }
}

/// Accepts analysis requests and drives them to a terminal status.
///
/// Cheap to clone; clones share the same store, registry and execution units.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval
    }

    pub fn control_registry(&self) -> &TaskControlRegistry {
        &self.shared.registry
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.shared.providers
    }

    /// Validate, persist a `pending` record, register its control handle and
    /// start its execution unit. Returns without waiting for any provider call.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId, TaskError> {
        self.validate(&request)?;

        let shared = &self.shared;
        let task_id = shared.ids.generate_task_id();
        let template = request
            .options
            .prompt_template
            .unwrap_or_else(|| shared.prompt_template.clone());
        let max_retries = request.options.max_retries.unwrap_or(shared.retry.max_retries);
        let record = TaskRecord::new(
            task_id,
            request.kind,
            request.owner_id,
            request.provider,
            template,
            request.subjects,
            max_retries,
            shared.now(),
        );

        {
            // held until the handle exists, so recovery never sees the record unregistered
            let _guard = shared.lock_task(task_id).await;
            shared.store.create(&record).await?;
            shared.registry.register(task_id)?;
        }
        tracing::info!(
            %task_id,
            kind = ?record.kind,
            owner_id = %record.owner_id,
            provider = %record.provider,
            subjects = record.subjects.len(),
            "task submitted"
        );
        execution::spawn(self.shared.clone(), task_id);
        Ok(task_id)
    }

    fn validate(&self, request: &SubmitRequest) -> Result<(), TaskError> {
        if request.subjects.is_empty() {
            return Err(TaskError::validation("subjects must not be empty"));
        }
        if request.kind == TaskKind::Single && request.subjects.len() != 1 {
            return Err(TaskError::validation(format!(
                "a single task takes exactly one subject, got {}",
                request.subjects.len()
            )));
        }
        let mut seen = HashSet::new();
        for subject in &request.subjects {
            if subject.key.trim().is_empty() {
                return Err(TaskError::validation("subject key must not be empty"));
            }
            if !seen.insert(subject.key.as_str()) {
                return Err(TaskError::validation(format!("duplicate subject '{}'", subject.key)));
            }
        }
        if !self.shared.providers.contains(&request.provider) {
            return Err(TaskError::validation(format!(
                "unknown provider '{}' (available: {})",
                request.provider,
                self.shared.providers.names().join(", ")
            )));
        }
        Ok(())
    }

    pub async fn get_status(&self, task_id: TaskId) -> Result<TaskRecord, TaskError> {
        Ok(self.shared.store.read(task_id).await?)
    }

    /// Newest first, at most `limit` records.
    pub async fn list_tasks(&self, owner_id: &str, limit: usize) -> Result<Vec<TaskRecord>, TaskError> {
        let mut records = self.shared.store.list_by_owner(owner_id).await?;
        records.truncate(limit);
        Ok(records)
    }

    /// Pause a `pending` or `running` task.
    pub async fn pause(&self, task_id: TaskId) -> Result<bool, TaskError> {
        self.control(task_id, ControlOp::Pause).await
    }

    /// Resume a `paused` task.
    pub async fn resume(&self, task_id: TaskId) -> Result<bool, TaskError> {
        self.control(task_id, ControlOp::Resume).await
    }

    /// Stop a `pending`, `running` or `paused` task. Irrevocable.
    pub async fn stop(&self, task_id: TaskId) -> Result<bool, TaskError> {
        self.control(task_id, ControlOp::Stop).await
    }

    async fn control(&self, task_id: TaskId, op: ControlOp) -> Result<bool, TaskError> {
        let shared = &self.shared;
        let _guard = shared.lock_task(task_id).await;
        let mut record = shared.store.read(task_id).await?;

        let next = match (op, record.status) {
            (ControlOp::Pause, TaskStatus::Pending | TaskStatus::Running) => TaskStatus::Paused,
            (ControlOp::Resume, TaskStatus::Paused) => TaskStatus::Running,
            (ControlOp::Stop, TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused) => TaskStatus::Stopped,
            (op, status) => return Err(TaskError::InvalidState { task_id, status, op }),
        };

        let status = record.status;
        record
            .transition(next, shared.now())
            .map_err(|_| TaskError::InvalidState { task_id, status, op })?;
        // persist first: a failed write must leave no signal behind
        shared.store.write(&record).await?;

        let signalled = match op {
            ControlOp::Pause => shared.registry.pause(task_id),
            ControlOp::Resume => shared.registry.resume(task_id),
            ControlOp::Stop => shared.registry.stop(task_id),
            ControlOp::Retry => false,
        };
        if !signalled {
            tracing::warn!(%task_id, %op, "no live execution unit; updated persisted status only");
        }
        tracing::info!(%task_id, %op, from = %status, to = %next, "control operation applied");
        Ok(true)
    }

    /// Re-run a `failed` task under the same id.
    ///
    /// Resets counters, history, progress and the ended timestamps, then
    /// starts a fresh execution unit.
    pub async fn retry(&self, task_id: TaskId) -> Result<bool, TaskError> {
        let shared = &self.shared;
        let _guard = shared.lock_task(task_id).await;
        let mut record = shared.store.read(task_id).await?;
        if record.status != TaskStatus::Failed {
            return Err(TaskError::InvalidState {
                task_id,
                status: record.status,
                op: ControlOp::Retry,
            });
        }

        shared.registry.register(task_id)?;
        record.reset_for_retry();
        if let Err(e) = shared.store.write(&record).await {
            shared.registry.unregister(task_id);
            return Err(e.into());
        }
        tracing::info!(%task_id, "task reset for retry");
        execution::spawn(self.shared.clone(), task_id);
        Ok(true)
    }

    /// Delete a terminal task.
    pub async fn delete(&self, task_id: TaskId) -> Result<(), TaskError> {
        let _guard = self.shared.lock_task(task_id).await;
        self.shared.store.delete(task_id).await?;
        tracing::info!(%task_id, "task deleted");
        Ok(())
    }

    /// Mark every non-terminal record without a live execution unit as failed.
    ///
    /// Meant to run once at startup. Safe alongside `submit`: a record is
    /// created and registered under its task lock, which recovery also takes.
    pub async fn recover_interrupted(&self) -> Result<Vec<TaskId>, TaskError> {
        let shared = &self.shared;
        let mut recovered = Vec::new();
        for candidate in shared.store.list_all().await? {
            if candidate.is_terminal() || shared.registry.is_registered(candidate.task_id) {
                continue;
            }
            let task_id = candidate.task_id;
            let _guard = shared.lock_task(task_id).await;
            let mut record = shared.store.read(task_id).await?;
            if shared.registry.is_registered(task_id) || !record.force_fail(INTERRUPTED_MESSAGE, shared.now()) {
                continue;
            }
            shared.store.write(&record).await?;
            tracing::warn!(%task_id, "interrupted task marked failed");
            recovered.push(task_id);
        }
        Ok(recovered)
    }

    /// Per-status counts, for one owner or for every task.
    pub async fn counts(&self, owner_id: Option<&str>) -> Result<TaskCounts, TaskError> {
        let records = match owner_id {
            Some(owner_id) => self.shared.store.list_by_owner(owner_id).await?,
            None => self.shared.store.list_all().await?,
        };
        Ok(TaskCounts::from_records(&records))
    }

    /// Poll the store until the task reaches a terminal status.
    ///
    /// Has no timeout of its own; wrap it in `tokio::time::timeout` if needed.
    pub async fn wait_until_terminal(&self, task_id: TaskId, poll: Duration) -> Result<TaskRecord, TaskError> {
        loop {
            let record = self.get_status(task_id).await?;
            if record.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
