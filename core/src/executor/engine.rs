use std::sync::Arc;

use crate::backend::{ExecutionBackend, ExpansionLookup, RunParameters};
use crate::error::ExecutorError;
use crate::stream::{EventFeed, EventStreamMonitor};

use super::expansion::ExpansionResolver;
use super::graph::TaskGraph;
use super::scheduler::{Scheduler, SESSION_LOG_DRAIN_TIMEOUT};
use super::types::{ExecutionOpts, RunReport, TaskDefinition};

/// Execution engine for task dependency graphs
///
/// Wires the collaborators for one run: builds and validates the graph,
/// resolves dynamic templates, opens the single event subscription and hands
/// the frozen graph to the [`Scheduler`].
pub struct ExecutionEngine {
    backend: Arc<dyn ExecutionBackend>,
    feed: Box<dyn EventFeed>,
    lookup: Option<Arc<dyn ExpansionLookup>>,
    opts: ExecutionOpts,
    run_id: Option<String>,
}

pub struct ExecutionEngineBuilder {
    backend: Arc<dyn ExecutionBackend>,
    feed: Box<dyn EventFeed>,
    lookup: Option<Arc<dyn ExpansionLookup>>,
    opts: ExecutionOpts,
    run_id: Option<String>,
}

impl ExecutionEngine {
    pub fn builder(
        backend: Arc<dyn ExecutionBackend>,
        feed: Box<dyn EventFeed>,
    ) -> ExecutionEngineBuilder {
        ExecutionEngineBuilder::new(backend, feed)
    }

    pub fn opts(&self) -> &ExecutionOpts {
        &self.opts
    }

    /// Execute a set of task definitions.
    ///
    /// Structural errors surface before any lookup or subscription happens.
    pub async fn run(
        self,
        definitions: Vec<TaskDefinition>,
        params: &RunParameters,
    ) -> Result<RunReport, ExecutorError> {
        let mut graph = TaskGraph::from_definitions(definitions)?;
        graph.validate()?;

        let expansion = ExpansionResolver::new(self.lookup.clone())
            .resolve(&mut graph, params)
            .await?;

        let mut monitor = EventStreamMonitor::start(self.feed).await?;

        let mut scheduler = Scheduler::new(self.backend.as_ref(), &monitor, &self.opts);
        if let Some(run_id) = self.run_id {
            scheduler = scheduler.with_run_id(run_id);
        }
        let result = scheduler.run_expanded(graph, expansion).await;
        let session_logs = scheduler.into_session_logs();

        monitor.shutdown();
        if let Some(logs) = session_logs {
            logs.drain(SESSION_LOG_DRAIN_TIMEOUT).await;
        }
        result
    }
}

impl ExecutionEngineBuilder {
    pub fn new(backend: Arc<dyn ExecutionBackend>, feed: Box<dyn EventFeed>) -> Self {
        Self {
            backend,
            feed,
            lookup: None,
            opts: ExecutionOpts::default(),
            run_id: None,
        }
    }

    pub fn expansion_lookup(mut self, lookup: Arc<dyn ExpansionLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn opts(mut self, opts: ExecutionOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn build(self) -> ExecutionEngine {
        ExecutionEngine {
            backend: self.backend,
            feed: self.feed,
            lookup: self.lookup,
            opts: self.opts,
            run_id: self.run_id,
        }
    }
}
