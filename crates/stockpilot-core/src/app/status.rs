//! Status - ステータス集計

use serde::{Deserialize, Serialize};

use crate::domain::{TaskRecord, TaskStatus};

/// Number of tasks per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    pub stopped: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn from_records(records: &[TaskRecord]) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.status);
        }
        counts
    }

    fn add(&mut self, status: TaskStatus) {
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Paused => &mut self.paused,
            TaskStatus::Stopped => &mut self.stopped,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.paused + self.stopped + self.completed + self.failed
    }

    /// Tasks that can still change.
    pub fn active(&self) -> usize {
        self.pending + self.running + self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Subject, TaskId, TaskKind};
    use chrono::Utc;
    use ulid::Ulid;

    #[test]
    fn counts_every_status() {
        let mut records = Vec::new();
        for status in [TaskStatus::Pending, TaskStatus::Paused, TaskStatus::Stopped, TaskStatus::Stopped] {
            let mut r = TaskRecord::new(
                TaskId::from_ulid(Ulid::new()),
                TaskKind::Single,
                "u1",
                "fake",
                "",
                vec![Subject::new("A")],
                3,
                Utc::now(),
            );
            if status != TaskStatus::Pending {
                r.transition(status, Utc::now()).unwrap();
            }
            records.push(r);
        }

        let counts = TaskCounts::from_records(&records);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.paused, 1);
        assert_eq!(counts.stopped, 2);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.active(), 2);
    }
}
