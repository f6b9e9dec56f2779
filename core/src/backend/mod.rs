use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::types::{ExpansionRequirement, WorkRequest};

/// Parameters of the current run, passed to expansion lookups.
pub type RunParameters = BTreeMap<String, String>;

/// Typed handle for work the backend accepted.
///
/// `correlation_id` is the token every event about this work carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub correlation_id: String,
    pub task_id: String,
    #[serde(default)]
    pub metadata: Value,
}

impl ExecutionHandle {
    pub fn new(correlation_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            task_id: task_id.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Starts units of work on the external execution service.
///
/// Starting is split in two so the caller can register interest in a
/// correlation id before any event about it can exist: [`prepare`] allocates
/// the handle, [`dispatch`] actually sets the work going.
///
/// [`prepare`]: ExecutionBackend::prepare
/// [`dispatch`]: ExecutionBackend::dispatch
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate the handle for `request`. No work may start here.
    async fn prepare(&self, request: &WorkRequest) -> anyhow::Result<ExecutionHandle>;

    /// Start the prepared work. Events for `handle` may arrive before this
    /// returns. An `Err` means nothing was started.
    async fn dispatch(&self, handle: &ExecutionHandle, request: &WorkRequest)
        -> anyhow::Result<()>;

    /// Prepare and dispatch in one call, for callers with no listener to
    /// register in between.
    async fn start_work(&self, request: &WorkRequest) -> anyhow::Result<ExecutionHandle> {
        let handle = self.prepare(request).await?;
        self.dispatch(&handle, request).await?;
        Ok(handle)
    }
}

/// Resolves a dynamic template into concrete requirements.
#[async_trait]
pub trait ExpansionLookup: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(
        &self,
        template: &str,
        params: &RunParameters,
    ) -> anyhow::Result<Vec<ExpansionRequirement>>;
}
