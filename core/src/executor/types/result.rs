use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::executor::expansion::ExpansionSummary;
use crate::stream::StatsSnapshot;

use super::state::TaskState;
use super::task::TaskInstance;

/// Result of executing a task graph
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,

    /// Terminal (or blocked) state of every task, keyed by instance id
    pub per_task: BTreeMap<String, TaskReport>,

    /// Wall-clock duration of the whole run in milliseconds
    pub overall_duration_ms: u64,

    pub completed_count: usize,

    pub failed_count: usize,

    /// Pending tasks that never ran because an upstream task failed
    pub blocked_count: usize,

    /// How dynamic templates were resolved before scheduling
    pub expansion: ExpansionSummary,
}

impl RunReport {
    /// True when no task failed. Blocked tasks imply a failure upstream.
    pub fn success(&self) -> bool {
        self.failed_count == 0
    }
}

/// Result of a single task instance
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub state: TaskState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    pub stats: StatsSnapshot,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Backend-specific data attached when the work was started
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Failed upstream tasks keeping this one pending
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
}

impl TaskReport {
    pub fn from_instance(instance: &TaskInstance, blocked_by: Vec<String>) -> Self {
        Self {
            state: instance.state,
            duration_ms: instance.duration_ms(),
            stats: instance
                .outcome
                .as_ref()
                .map(|o| o.stats.clone())
                .unwrap_or_default(),
            error: instance.error.as_ref().map(|e| e.to_string()),
            error_kind: instance.error.as_ref().map(|e| e.kind()),
            correlation_id: instance.correlation_id.clone(),
            metadata: instance.metadata.clone(),
            started_at: instance.started_at,
            ended_at: instance.ended_at,
            blocked_by,
        }
    }
}
