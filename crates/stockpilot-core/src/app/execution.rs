//! Execution unit - 1 タスクを terminal まで進める非同期タスク
//!
//! # フロー
//! 1. pending -> running（既に paused なら started_at だけ記録して paused のまま）
//! 2. subject ごとに wait_while_paused → generate → 成功 / retry / 失敗
//! 3. 全 subject 終了後、pause が解けるのを待ってから completed / failed に確定
//! 4. 最終書き込みと unregister を同じロックの中で行う
//!
//! A supervisor awaits every unit. If the unit panics or hits an internal
//! error (store I/O), the supervisor force-fails the record and unregisters
//! the handle, so no record is left `running` without a writer.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::app::orchestrator::Shared;
use crate::domain::{ErrorKind, InvalidTransition, Outcome, Subject, SubjectResult, TaskId, TaskRecord, TaskStatus};
use crate::ports::{LlmProvider, StoreError};
use crate::prompt::render_prompt;

#[derive(Debug, thiserror::Error)]
pub(crate) enum UnitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),
}

/// How a subject's retry loop ended.
enum SubjectEnd {
    Finished,
    /// Stop signal observed, or the record turned terminal underneath us.
    Halted,
}

/// Spawn the execution unit of `task_id` and its supervisor.
///
/// The caller must have registered the control handle.
pub(crate) fn spawn(shared: Arc<Shared>, task_id: TaskId) {
    let unit = tokio::spawn(run(shared.clone(), task_id));
    tokio::spawn(supervise(shared, task_id, unit));
}

async fn supervise(shared: Arc<Shared>, task_id: TaskId, unit: JoinHandle<Result<(), UnitError>>) {
    let message = match unit.await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => {
            tracing::error!(%task_id, error = %e, "execution unit failed");
            format!("internal error: {e}")
        }
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            tracing::error!(%task_id, panic = %message, "execution unit panicked");
            format!("internal error: execution unit panicked: {message}")
        }
        Err(e) => {
            tracing::error!(%task_id, error = %e, "execution unit cancelled");
            "internal error: execution unit cancelled".to_string()
        }
    };

    let _guard = shared.lock_task(task_id).await;
    match shared.store.read(task_id).await {
        Ok(mut record) => {
            if record.force_fail(message, shared.now())
                && let Err(e) = shared.store.write(&record).await
            {
                tracing::error!(%task_id, error = %e, "failed to persist failed status");
            }
        }
        Err(e) => tracing::error!(%task_id, error = %e, "failed to read record after unit failure"),
    }
    shared.registry.unregister(task_id);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}

async fn run(shared: Arc<Shared>, task_id: TaskId) -> Result<(), UnitError> {
    let Some(record) = start(&shared, task_id).await? else {
        return Ok(());
    };
    let provider = shared
        .providers
        .get(&record.provider)
        .ok_or_else(|| UnitError::UnknownProvider(record.provider.clone()))?;

    for subject in &record.subjects {
        if !shared.registry.wait_while_paused(task_id, shared.poll_interval).await {
            return halt(&shared, task_id).await;
        }
        let prompt = render_prompt(&record.prompt_template, subject, shared.now().date_naive());
        let end = run_subject(&shared, task_id, provider.clone(), subject, prompt, record.max_retries).await?;
        if let SubjectEnd::Halted = end {
            return halt(&shared, task_id).await;
        }
    }

    finalize(&shared, task_id).await
}

/// Move the record to `running`. `None` means there is nothing to run.
async fn start(shared: &Shared, task_id: TaskId) -> Result<Option<TaskRecord>, UnitError> {
    let _guard = shared.lock_task(task_id).await;
    let mut record = shared.store.read(task_id).await?;
    let now = shared.now();
    match record.status {
        TaskStatus::Pending => record.transition(TaskStatus::Running, now)?,
        // paused (or paused and resumed) before the unit got here
        TaskStatus::Paused | TaskStatus::Running => record.mark_started(now),
        status => {
            tracing::info!(%task_id, %status, "task already terminal; execution unit exits");
            shared.registry.unregister(task_id);
            return Ok(None);
        }
    }
    shared.store.write(&record).await?;
    tracing::info!(%task_id, status = %record.status, "execution started");
    Ok(Some(record))
}

async fn run_subject(
    shared: &Shared,
    task_id: TaskId,
    provider: Arc<dyn LlmProvider>,
    subject: &Subject,
    prompt: String,
    max_retries: u32,
) -> Result<SubjectEnd, UnitError> {
    let key = subject.key.as_str();
    let begun = shared
        .update_record(task_id, |record, now| record.begin_subject(key, now))
        .await?;
    if begun.is_none() {
        return Ok(SubjectEnd::Halted);
    }

    let mut attempt: u32 = 0;
    loop {
        match call_provider(provider.clone(), prompt.clone(), subject.clone()).await {
            Outcome::Success {
                content,
                tokens_used,
                model,
                response_time_ms,
            } => {
                let result = SubjectResult {
                    content,
                    tokens_used,
                    model,
                };
                let written = shared
                    .update_record(task_id, |record, now| record.complete_subject(key, result, now))
                    .await?;
                if written.is_none() {
                    return Ok(SubjectEnd::Halted);
                }
                tracing::info!(%task_id, subject = %key, attempt, ?tokens_used, ?response_time_ms, "subject completed");
                return Ok(SubjectEnd::Finished);
            }
            Outcome::Failure { message, error_kind } => {
                let retry = shared.retry.should_retry_within(error_kind, attempt, max_retries);
                let summary = format!("{error_kind}: {message}");
                tracing::warn!(%task_id, subject = %key, attempt, %error_kind, retry, error = %message, "provider call failed");

                let written = shared
                    .update_record(task_id, |record, now| {
                        record.record_failure(key, attempt + 1, error_kind, &summary, now);
                        if retry {
                            record.record_retry(key, attempt + 1);
                        } else {
                            record.fail_subject(key, &summary, now);
                        }
                    })
                    .await?;
                if written.is_none() {
                    return Ok(SubjectEnd::Halted);
                }
                if !retry {
                    tracing::info!(%task_id, subject = %key, "subject failed");
                    return Ok(SubjectEnd::Finished);
                }

                attempt += 1;
                let delay = shared.retry.delay_for(attempt);
                tracing::info!(%task_id, subject = %key, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
                if !backoff(shared, task_id, delay).await {
                    return Ok(SubjectEnd::Halted);
                }
            }
        }
    }
}

/// One provider call, isolated in its own task so that a panic inside the
/// provider becomes an `unknown` failure instead of killing the unit.
async fn call_provider(provider: Arc<dyn LlmProvider>, prompt: String, subject: Subject) -> Outcome {
    let call = tokio::spawn(async move { provider.generate(&prompt, &subject).await });
    match call.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Outcome::failure(
            ErrorKind::Unknown,
            format!("provider panicked: {}", panic_message(e.into_panic())),
        ),
        Err(e) => Outcome::failure(ErrorKind::Unknown, format!("provider call aborted: {e}")),
    }
}

/// Sleep `delay` in slices of at most one poll interval, honouring pause and
/// stop between slices. Returns `false` when the unit must halt.
async fn backoff(shared: &Shared, task_id: TaskId, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if !shared.registry.wait_while_paused(task_id, shared.poll_interval).await {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        let slice = (deadline - now).min(shared.poll_interval);
        shared.registry.sleep_unless_signalled(task_id, slice).await;
    }
}

/// Stop path: persist `stopped` (unless already terminal) and unregister.
async fn halt(shared: &Shared, task_id: TaskId) -> Result<(), UnitError> {
    let _guard = shared.lock_task(task_id).await;
    let mut record = shared.store.read(task_id).await?;
    if !record.is_terminal() {
        record.transition(TaskStatus::Stopped, shared.now())?;
        shared.store.write(&record).await?;
    }
    shared.registry.unregister(task_id);
    tracing::info!(%task_id, status = %record.status, "execution halted");
    Ok(())
}

/// Wait out any pause, then persist `completed` / `failed` and unregister.
async fn finalize(shared: &Shared, task_id: TaskId) -> Result<(), UnitError> {
    loop {
        if !shared.registry.wait_while_paused(task_id, shared.poll_interval).await {
            return halt(shared, task_id).await;
        }

        let guard = shared.lock_task(task_id).await;
        let mut record = shared.store.read(task_id).await?;
        if record.is_terminal() {
            shared.registry.unregister(task_id);
            return Ok(());
        }
        if record.status == TaskStatus::Paused {
            // paused between the wait and the lock
            drop(guard);
            if !shared.registry.is_paused(task_id) {
                tokio::time::sleep(shared.poll_interval).await;
            }
            continue;
        }

        let status = record.finalize(shared.now())?;
        shared.store.write(&record).await?;
        shared.registry.unregister(task_id);
        tracing::info!(
            %task_id,
            %status,
            completed = record.progress.completed_count,
            failed = record.progress.failed_count,
            "task finalized"
        );
        return Ok(());
    }
}
