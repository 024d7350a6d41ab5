//! TaskControlRegistry - 実行ユニットへの帯域外制御
//!
//! # 学習ポイント
//! - Mutex<HashMap> による handle 管理（handle ごとの flag は粗いロックで十分）
//! - Notify + bounded sleep による協調的な待機
//! - 実行ユニットは task_id だけを持ち、handle 自体には触らない
//!
//! 全ての操作は handle が無い場合に false を返します。タスクは呼び出し側の
//! check と action の間に終了して unregister されることがあるためです。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::domain::TaskId;
use crate::ports::{Clock, SystemClock};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task {0} already has a live control handle")]
    AlreadyRegistered(TaskId),
}

/// In-memory signals of one execution unit.
#[derive(Debug)]
struct ControlHandle {
    paused: bool,
    /// One-way: never cleared once set.
    stopped: bool,
    registered_at: DateTime<Utc>,
    /// Wakes `wait_while_paused` early on resume / stop.
    wake: Arc<Notify>,
}

/// Snapshot of a handle, for status views and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub paused: bool,
    pub stopped: bool,
    pub registered_at: DateTime<Utc>,
}

/// Process-wide registry of control handles, owned by one orchestrator.
pub struct TaskControlRegistry {
    handles: Mutex<HashMap<TaskId, ControlHandle>>,
    clock: Arc<dyn Clock>,
}

impl TaskControlRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            clock,
        }
    }

    // Handles are plain flags, so a poisoned lock still holds consistent state.
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, ControlHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a handle with both signals cleared.
    pub fn register(&self, task_id: TaskId) -> Result<(), RegistryError> {
        let mut handles = self.lock();
        if handles.contains_key(&task_id) {
            return Err(RegistryError::AlreadyRegistered(task_id));
        }
        handles.insert(
            task_id,
            ControlHandle {
                paused: false,
                stopped: false,
                registered_at: self.clock.now(),
                wake: Arc::new(Notify::new()),
            },
        );
        tracing::debug!(%task_id, "control handle registered");
        Ok(())
    }

    /// Remove the handle. Returns whether one existed.
    pub fn unregister(&self, task_id: TaskId) -> bool {
        let removed = self.lock().remove(&task_id);
        match removed {
            Some(handle) => {
                handle.wake.notify_waiters();
                tracing::debug!(%task_id, "control handle unregistered");
                true
            }
            None => false,
        }
    }

    /// Set the pause signal unless the handle is missing or already stopped.
    pub fn pause(&self, task_id: TaskId) -> bool {
        let mut handles = self.lock();
        match handles.get_mut(&task_id) {
            Some(handle) if !handle.stopped => {
                handle.paused = true;
                true
            }
            _ => false,
        }
    }

    /// Clear the pause signal.
    pub fn resume(&self, task_id: TaskId) -> bool {
        let mut handles = self.lock();
        match handles.get_mut(&task_id) {
            Some(handle) => {
                handle.paused = false;
                handle.wake.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Set the stop signal. It cannot be unset.
    pub fn stop(&self, task_id: TaskId) -> bool {
        let mut handles = self.lock();
        match handles.get_mut(&task_id) {
            Some(handle) => {
                handle.stopped = true;
                handle.wake.notify_waiters();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, task_id: TaskId) -> bool {
        self.lock().contains_key(&task_id)
    }

    pub fn is_paused(&self, task_id: TaskId) -> bool {
        self.lock().get(&task_id).is_some_and(|h| h.paused)
    }

    pub fn is_stopped(&self, task_id: TaskId) -> bool {
        self.lock().get(&task_id).is_some_and(|h| h.stopped)
    }

    pub fn snapshot(&self, task_id: TaskId) -> Option<ControlSnapshot> {
        self.lock().get(&task_id).map(|h| ControlSnapshot {
            paused: h.paused,
            stopped: h.stopped,
            registered_at: h.registered_at,
        })
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sleep for at most `timeout`, waking early on resume, stop or unregister.
    pub async fn sleep_unless_signalled(&self, task_id: TaskId, timeout: Duration) {
        let wake = self.lock().get(&task_id).map(|h| h.wake.clone());
        match wake {
            Some(wake) => {
                let notified = wake.notified();
                tokio::pin!(notified);
                // register before checking, so a stop in between still wakes us
                notified.as_mut().enable();
                if self.is_stopped(task_id) {
                    return;
                }
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(timeout) => {}
                }
            }
            None => tokio::time::sleep(timeout).await,
        }
    }

    /// Suspend the caller while paused.
    ///
    /// Returns `false` as soon as the stop signal is set (stop wins over pause)
    /// or the handle is gone, and `true` once the task is neither paused nor
    /// stopped. Signals are re-checked at least every `poll_interval`.
    pub async fn wait_while_paused(&self, task_id: TaskId, poll_interval: Duration) -> bool {
        let mut logged = false;
        loop {
            let wake = {
                let handles = self.lock();
                let Some(handle) = handles.get(&task_id) else {
                    return false;
                };
                if handle.stopped {
                    return false;
                }
                if !handle.paused {
                    return true;
                }
                handle.wake.clone()
            };
            if !logged {
                tracing::info!(%task_id, "execution paused; waiting for resume");
                logged = true;
            }
            tokio::select! {
                _ = wake.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

impl Default for TaskControlRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;
    use ulid::Ulid;

    fn new_id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    #[test]
    fn register_twice_is_rejected_until_unregistered() {
        let registry = TaskControlRegistry::default();
        let id = new_id();
        registry.register(id).unwrap();
        assert!(matches!(
            registry.register(id),
            Err(RegistryError::AlreadyRegistered(got)) if got == id
        ));
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.register(id).unwrap();
    }

    #[test]
    fn missing_handle_reports_false() {
        let registry = TaskControlRegistry::default();
        let id = new_id();
        assert!(!registry.pause(id));
        assert!(!registry.resume(id));
        assert!(!registry.stop(id));
        assert!(!registry.is_paused(id));
        assert!(registry.snapshot(id).is_none());
    }

    #[test]
    fn pause_after_stop_has_no_effect() {
        let registry = TaskControlRegistry::default();
        let id = new_id();
        registry.register(id).unwrap();
        assert!(registry.stop(id));
        assert!(!registry.pause(id));
        assert!(!registry.is_paused(id));
        assert!(registry.is_stopped(id));
    }

    #[tokio::test]
    async fn wait_returns_true_when_not_paused() {
        let registry = TaskControlRegistry::default();
        let id = new_id();
        registry.register(id).unwrap();
        assert!(registry.wait_while_paused(id, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_returns_false_when_stopped_even_if_paused() {
        let registry = TaskControlRegistry::default();
        let id = new_id();
        registry.register(id).unwrap();
        registry.pause(id);
        registry.stop(id);
        assert!(!registry.wait_while_paused(id, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn wait_blocks_until_resume() {
        let registry = Arc::new(TaskControlRegistry::default());
        let id = new_id();
        registry.register(id).unwrap();
        registry.pause(id);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_while_paused(id, Duration::from_millis(20)).await })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!waiter.is_finished());

        registry.resume(id);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn stop_wakes_a_paused_waiter_within_one_poll() {
        let registry = Arc::new(TaskControlRegistry::default());
        let id = new_id();
        registry.register(id).unwrap();
        registry.pause(id);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_while_paused(id, Duration::from_millis(200)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let start = Instant::now();
        registry.stop(id);
        assert!(!waiter.await.unwrap());
        assert!(start.elapsed() <= Duration::from_millis(250));
    }
}
