//! Task lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a task analyses one subject or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Single,
    Batch,
}

/// Task status.
///
/// State transitions:
/// - Pending -> Running (execution starts)
/// - Pending -> Paused (pause accepted before the execution unit started)
/// - Running -> Paused -> Running (pause / resume)
/// - Pending | Running | Paused -> Stopped
/// - Running -> Completed (all subjects succeeded)
/// - Running -> Failed (at least one subject exhausted its retries)
///
/// Stopped, Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Stopped | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Paused)
                | (Running, Paused)
                | (Paused, Running)
                | (Pending | Running | Paused, Stopped)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one subject inside a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SubjectStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, SubjectStatus::Completed | SubjectStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start(TaskStatus::Pending, TaskStatus::Running)]
    #[case::pause_pending(TaskStatus::Pending, TaskStatus::Paused)]
    #[case::pause(TaskStatus::Running, TaskStatus::Paused)]
    #[case::resume(TaskStatus::Paused, TaskStatus::Running)]
    #[case::stop_pending(TaskStatus::Pending, TaskStatus::Stopped)]
    #[case::stop_running(TaskStatus::Running, TaskStatus::Stopped)]
    #[case::stop_paused(TaskStatus::Paused, TaskStatus::Stopped)]
    #[case::complete(TaskStatus::Running, TaskStatus::Completed)]
    #[case::fail(TaskStatus::Running, TaskStatus::Failed)]
    fn valid_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::paused_completes(TaskStatus::Paused, TaskStatus::Completed)]
    #[case::pending_completes(TaskStatus::Pending, TaskStatus::Completed)]
    #[case::resume_running(TaskStatus::Running, TaskStatus::Running)]
    #[case::back_to_pending(TaskStatus::Running, TaskStatus::Pending)]
    fn invalid_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[rstest]
    #[case(TaskStatus::Stopped)]
    #[case(TaskStatus::Completed)]
    #[case(TaskStatus::Failed)]
    fn nothing_leaves_a_terminal_state(#[case] terminal: TaskStatus) {
        use TaskStatus::*;
        assert!(terminal.is_terminal());
        for next in [Pending, Running, Paused, Stopped, Completed, Failed] {
            assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&TaskStatus::Completed).unwrap();
        assert_eq!(s, "\"completed\"");
        let k = serde_json::to_string(&TaskKind::Batch).unwrap();
        assert_eq!(k, "\"batch\"");
    }
}
