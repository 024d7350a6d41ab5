//! Task record: the durable state of one submitted analysis task.
//!
//! Design:
//! - This is the "single source of truth" for task state; status queries read it.
//! - Every status change goes through `transition`, which refuses edges that are
//!   not part of the state machine.
//! - Progress is only mutated while the record is non-terminal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ErrorKind;
use super::ids::TaskId;
use super::spec::Subject;
use super::state::{SubjectStatus, TaskKind, TaskStatus};

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Lifecycle timestamps. Each one is set at most once per lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            started_at: None,
            paused_at: None,
            resumed_at: None,
            stopped_at: None,
            completed_at: None,
            failed_at: None,
        }
    }
}

fn stamp(slot: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) {
    if slot.is_none() {
        *slot = Some(now);
    }
}

/// Completed / failed counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// `(completed + failed) * 100 / total`, rounded down.
    pub percent: u8,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn refresh_percent(&mut self) {
        self.percent = if self.total == 0 {
            0
        } else {
            ((self.completed_count + self.failed_count) * 100 / self.total) as u8
        };
    }
}

/// One failed provider call. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEntry {
    pub subject: String,
    /// 1-based number of the provider call that failed.
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub error_kind: ErrorKind,
    pub error_summary: String,
}

/// What a successful provider call produced for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Per-subject progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectState {
    pub status: SubjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SubjectResult>,
}

impl SubjectState {
    fn pending() -> Self {
        Self {
            status: SubjectStatus::Pending,
            error: None,
            retry_count: 0,
            started_at: None,
            finished_at: None,
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,

    /// Opaque to the core; only stored and filtered on.
    pub owner_id: String,

    /// Name of the provider in the `ProviderRegistry`.
    pub provider: String,

    pub prompt_template: String,

    pub subjects: Vec<Subject>,

    pub max_retries: u32,

    /// Subject key -> retries performed so far (never above `max_retries`).
    pub attempt_counters: BTreeMap<String, u32>,

    pub progress: Progress,

    pub retry_history: Vec<RetryEntry>,

    pub per_subject_status: BTreeMap<String, SubjectState>,

    pub timestamps: Timestamps,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_error: Option<String>,
}

impl TaskRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: TaskId,
        kind: TaskKind,
        owner_id: impl Into<String>,
        provider: impl Into<String>,
        prompt_template: impl Into<String>,
        subjects: Vec<Subject>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self {
            task_id,
            kind,
            status: TaskStatus::Pending,
            owner_id: owner_id.into(),
            provider: provider.into(),
            prompt_template: prompt_template.into(),
            progress: Progress::new(subjects.len()),
            subjects,
            max_retries,
            attempt_counters: BTreeMap::new(),
            retry_history: Vec::new(),
            per_subject_status: BTreeMap::new(),
            timestamps: Timestamps::new(now),
            final_error: None,
        };
        record.reset_subjects();
        record
    }

    fn reset_subjects(&mut self) {
        self.attempt_counters = self.subjects.iter().map(|s| (s.key.clone(), 0)).collect();
        self.per_subject_status = self
            .subjects
            .iter()
            .map(|s| (s.key.clone(), SubjectState::pending()))
            .collect();
        self.progress = Progress::new(self.subjects.len());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, stamping the matching timestamp.
    pub fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let ts = &mut self.timestamps;
        match next {
            TaskStatus::Running if self.status == TaskStatus::Paused => stamp(&mut ts.resumed_at, now),
            TaskStatus::Running => stamp(&mut ts.started_at, now),
            TaskStatus::Paused => stamp(&mut ts.paused_at, now),
            TaskStatus::Stopped => stamp(&mut ts.stopped_at, now),
            TaskStatus::Completed => stamp(&mut ts.completed_at, now),
            TaskStatus::Failed => stamp(&mut ts.failed_at, now),
            TaskStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    /// The execution unit picked the record up while it was already paused.
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        stamp(&mut self.timestamps.started_at, now);
    }

    pub fn subject_state(&self, key: &str) -> Option<&SubjectState> {
        self.per_subject_status.get(key)
    }

    pub fn retries_for(&self, key: &str) -> u32 {
        self.attempt_counters.get(key).copied().unwrap_or(0)
    }

    pub fn begin_subject(&mut self, key: &str, now: DateTime<Utc>) {
        if let Some(state) = self.per_subject_status.get_mut(key) {
            state.status = SubjectStatus::Running;
            stamp(&mut state.started_at, now);
        }
    }

    /// Append one failed provider call to the history.
    pub fn record_failure(
        &mut self,
        key: &str,
        attempt_number: u32,
        error_kind: ErrorKind,
        message: &str,
        now: DateTime<Utc>,
    ) {
        self.retry_history.push(RetryEntry {
            subject: key.to_string(),
            attempt_number,
            timestamp: now,
            error_kind,
            error_summary: message.to_string(),
        });
        if let Some(state) = self.per_subject_status.get_mut(key) {
            state.error = Some(message.to_string());
        }
    }

    /// Set the retry counter of `key`, capped at `max_retries`.
    pub fn record_retry(&mut self, key: &str, retries: u32) {
        let retries = retries.min(self.max_retries);
        self.attempt_counters.insert(key.to_string(), retries);
        if let Some(state) = self.per_subject_status.get_mut(key) {
            state.retry_count = retries;
        }
    }

    pub fn complete_subject(&mut self, key: &str, result: SubjectResult, now: DateTime<Utc>) {
        let Some(state) = self.per_subject_status.get_mut(key) else {
            return;
        };
        if state.status.is_finished() {
            return;
        }
        state.status = SubjectStatus::Completed;
        state.error = None;
        state.finished_at = Some(now);
        state.result = Some(result);
        self.progress.completed_count += 1;
        self.progress.refresh_percent();
    }

    pub fn fail_subject(&mut self, key: &str, error: &str, now: DateTime<Utc>) {
        let Some(state) = self.per_subject_status.get_mut(key) else {
            return;
        };
        if state.status.is_finished() {
            return;
        }
        state.status = SubjectStatus::Failed;
        state.error = Some(error.to_string());
        state.finished_at = Some(now);
        self.progress.failed_count += 1;
        self.progress.refresh_percent();
    }

    /// Terminal status implied by the subject results: all-or-nothing for both kinds.
    pub fn verdict(&self) -> (TaskStatus, Option<String>) {
        if self.progress.failed_count == 0 {
            return (TaskStatus::Completed, None);
        }
        let message = match self.kind {
            TaskKind::Single => self
                .per_subject_status
                .values()
                .find_map(|s| s.error.clone())
                .unwrap_or_else(|| "analysis failed".to_string()),
            TaskKind::Batch => {
                let failed: Vec<&str> = self
                    .per_subject_status
                    .iter()
                    .filter(|(_, s)| s.status == SubjectStatus::Failed)
                    .map(|(k, _)| k.as_str())
                    .collect();
                format!(
                    "{} of {} subjects failed ({}); {} completed",
                    self.progress.failed_count,
                    self.progress.total,
                    failed.join(", "),
                    self.progress.completed_count,
                )
            }
        };
        (TaskStatus::Failed, Some(message))
    }

    /// Finalize as completed or failed according to `verdict`.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Result<TaskStatus, InvalidTransition> {
        let (status, error) = self.verdict();
        self.transition(status, now)?;
        if status == TaskStatus::Failed && self.final_error.is_none() {
            self.final_error = error;
        }
        Ok(status)
    }

    /// Terminal failure outside the normal verdict (crash, lost execution unit).
    ///
    /// Unlike `transition`, this is allowed from any non-terminal status so that
    /// a record can never stay stuck in `running` without a writer.
    pub fn force_fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        stamp(&mut self.timestamps.failed_at, now);
        self.final_error = Some(message.into());
        true
    }

    /// Reset a failed record so that it can run again under the same id.
    pub fn reset_for_retry(&mut self) {
        self.reset_subjects();
        self.retry_history.clear();
        let ts = &mut self.timestamps;
        ts.started_at = None;
        ts.paused_at = None;
        ts.resumed_at = None;
        ts.stopped_at = None;
        ts.completed_at = None;
        ts.failed_at = None;
        self.final_error = None;
        self.status = TaskStatus::Pending;
    }
}
