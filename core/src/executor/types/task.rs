use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;
use crate::stream::TaskOutcome;

use super::state::TaskState;

/// Separator between a template name and the discriminator of an expanded task.
pub const EXPANSION_SEPARATOR: char = '#';

/// Immutable task template, defined before a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,

    /// Names of definitions this task waits on (declaration order).
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default = "default_parallelizable")]
    pub parallelizable: bool,

    #[serde(default)]
    pub priority: i32,

    /// Replaced by one instance per expansion requirement before scheduling.
    #[serde(default)]
    pub dynamic: bool,

    #[serde(default)]
    pub instructions: String,

    #[serde(default)]
    pub working_context: Option<String>,

    /// Instructions used when a dynamic template falls back to a single run.
    #[serde(default)]
    pub fallback_instructions: Option<String>,
}

fn default_parallelizable() -> bool {
    true
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            parallelizable: true,
            priority: 0,
            dynamic: false,
            instructions: String::new(),
            working_context: None,
            fallback_instructions: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_working_context(mut self, ctx: impl Into<String>) -> Self {
        self.working_context = Some(ctx.into());
        self
    }

    pub fn with_fallback_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.fallback_instructions = Some(instructions.into());
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.parallelizable = false;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }
}

/// One result of the external expansion lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionRequirement {
    /// Document id or label; becomes the discriminator of the expanded task.
    #[serde(alias = "docId", alias = "doc_id")]
    pub id: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ExpansionRequirement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Mutable runtime record of one schedulable unit.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub id: String,
    pub definition: Arc<TaskDefinition>,
    pub requirement: Option<ExpansionRequirement>,
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    /// Backend-specific data from the execution handle
    pub metadata: Value,
    pub outcome: Option<TaskOutcome>,
    pub error: Option<TaskError>,
    /// Dynamic template not yet expanded; cleared by expansion or freeze.
    pub(crate) placeholder: bool,
    /// Template kept as its own single instance after a failed or empty lookup.
    pub fallback: bool,
}

impl TaskInstance {
    pub(crate) fn from_definition(definition: Arc<TaskDefinition>) -> Self {
        let placeholder = definition.dynamic;
        Self {
            id: definition.name.clone(),
            definition,
            requirement: None,
            state: TaskState::Pending,
            started_at: None,
            ended_at: None,
            correlation_id: None,
            metadata: Value::Null,
            outcome: None,
            error: None,
            placeholder,
            fallback: false,
        }
    }

    pub(crate) fn expanded(
        definition: Arc<TaskDefinition>,
        id: String,
        requirement: ExpansionRequirement,
    ) -> Self {
        Self {
            id,
            definition,
            requirement: Some(requirement),
            state: TaskState::Pending,
            started_at: None,
            ended_at: None,
            correlation_id: None,
            metadata: Value::Null,
            outcome: None,
            error: None,
            placeholder: false,
            fallback: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.definition.dependencies
    }

    pub fn priority(&self) -> i32 {
        self.definition.priority
    }

    /// Instructions sent to the backend for this instance.
    pub fn instructions(&self) -> &str {
        if self.fallback {
            if let Some(fallback) = self.definition.fallback_instructions.as_deref() {
                return fallback;
            }
        }
        &self.definition.instructions
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        if let Some(outcome) = &self.outcome {
            return Some(outcome.duration.as_millis() as u64);
        }
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Everything the backend needs to start one task.
#[derive(Debug, Clone, Serialize)]
pub struct WorkRequest {
    pub task_id: String,
    pub working_context: Option<String>,
    pub instructions: String,
    pub requirement: Option<ExpansionRequirement>,
}

impl WorkRequest {
    pub fn for_instance(instance: &TaskInstance) -> Self {
        Self {
            task_id: instance.id.clone(),
            working_context: instance.definition.working_context.clone(),
            instructions: instance.instructions().to_string(),
            requirement: instance.requirement.clone(),
        }
    }
}
