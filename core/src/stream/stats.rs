use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{EventRecord, ResourceUsage};

/// Per-task statistics accumulated from the event feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub operation_count: u64,
    pub categories: BTreeMap<String, u64>,
    pub usage: ResourceUsage,
    pub cost: f64,
}

impl StatsSnapshot {
    /// Fold one event into the snapshot.
    ///
    /// Terminal events leave the snapshot untouched; a snapshot is frozen once
    /// its task reaches a terminal state.
    pub fn apply(mut self, event: &EventRecord) -> Self {
        if event.kind.is_terminal() {
            return self;
        }

        self.operation_count += 1;

        if let Some(category) = event.category.as_deref().filter(|c| !c.is_empty()) {
            *self.categories.entry(category.to_string()).or_insert(0) += 1;
        }

        if let Some(delta) = event.usage {
            self.usage = self.usage.saturating_add(delta);
        }

        if let Some(cost) = event.cost.filter(|c| c.is_finite() && *c > 0.0) {
            self.cost += cost;
        }

        self
    }

    pub fn total_tokens(&self) -> u64 {
        self.usage
            .input_tokens
            .saturating_add(self.usage.output_tokens)
            .saturating_add(self.usage.reasoning_tokens)
    }

    /// Structured record emitted once per task at its terminal transition.
    pub fn log_summary(&self, task_id: &str, outcome: &str, duration_ms: u64) {
        tracing::info!(
            target: "taskmesh.stats",
            task_id = %task_id,
            outcome = %outcome,
            duration_ms = duration_ms,
            operations = self.operation_count,
            categories = ?self.categories,
            input_tokens = self.usage.input_tokens,
            output_tokens = self.usage.output_tokens,
            reasoning_tokens = self.usage.reasoning_tokens,
            cost = self.cost,
            "task stats"
        );
    }
}
