//! Task state and the transition rules the scheduler enforces.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        StateTransition::is_terminal(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct StateTransition;

impl StateTransition {
    /// Whether `from -> to` is a legal move.
    ///
    /// `Pending -> Failed` covers a start request the backend rejected; such a
    /// task never becomes `Running`.
    pub fn is_valid(from: TaskState, to: TaskState) -> bool {
        matches!(
            (from, to),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Pending, TaskState::Failed)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }

    pub fn is_terminal(state: TaskState) -> bool {
        matches!(state, TaskState::Completed | TaskState::Failed)
    }
}
