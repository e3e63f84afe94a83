use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BootStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl BootStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BootStatus::Completed | BootStatus::Failed | BootStatus::Canceled
        )
    }
}

/// Progress counters for one agent boot run. Transient, rebuilt on demand.
/// Invariant at every update: `queued + running + completed + failed == total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootSession {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub status: BootStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BootSession {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            queued: total,
            running: 0,
            completed: 0,
            failed: 0,
            status: BootStatus::Idle,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    #[cfg(test)]
    pub fn counters_consistent(&self) -> bool {
        self.queued + self.running + self.completed + self.failed == self.total
    }
}
