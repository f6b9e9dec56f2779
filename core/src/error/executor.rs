use serde::Serialize;
use thiserror::Error;

use crate::executor::types::TaskState;

/// Run-level errors for task graph construction and scheduling.
///
/// Everything here either rejects a structurally broken graph before any task
/// runs, or aborts the run because the orchestrator itself can no longer make
/// progress. Task-scoped failures live in [`TaskError`].
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Duplicate task ID: {0}")]
    DuplicateTaskId(String),

    #[error("Invalid task name '{0}': '#' is reserved for expanded tasks")]
    InvalidTaskName(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Deadlock: pending tasks with no way to become ready: {}", pending.join(", "))]
    Deadlock { pending: Vec<String> },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task '{0}' is not an unexpanded dynamic template")]
    NotATemplate(String),

    #[error("Task graph is frozen; no further expansion is allowed")]
    GraphFrozen,

    #[error("Invalid transition for task '{task}': {from:?} -> {to:?}")]
    InvalidTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("Correlation id already registered: {0}")]
    DuplicateCorrelationId(String),

    #[error("Event feed closed: {0}")]
    FeedClosed(String),

    #[error("Event feed subscription failed: {0}")]
    Subscribe(String),

    #[error("config error: {0}")]
    Config(String),
}

impl ExecutorError {
    /// True for errors that mean the task graph itself is malformed.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTaskId(_)
                | Self::InvalidTaskName(_)
                | Self::CircularDependency(_)
                | Self::UnknownTask(_)
                | Self::NotATemplate(_)
        )
    }
}

/// Failure scoped to a single task instance.
///
/// These mark the instance `Failed` and end up in the run report; they never
/// abort sibling tasks.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    #[error("backend rejected start request: {message}")]
    Spawn { message: String },

    #[error("no terminal event within {timeout_ms}ms")]
    StreamTimeout { timeout_ms: u64 },

    #[error("backend reported error: {message}")]
    BackendReported { message: String },
}

impl TaskError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::StreamTimeout { .. } => "stream_timeout",
            Self::BackendReported { .. } => "backend_reported",
        }
    }
}

/// A dynamic expansion lookup that failed.
///
/// Recovered locally by keeping the original template, so this never surfaces
/// as a run failure; it is logged and listed in the expansion summary.
#[derive(Error, Debug, Clone, Serialize)]
#[error("expansion lookup for '{template}' failed: {message}")]
pub struct ExpansionLookupError {
    pub template: String,
    pub message: String,
}
