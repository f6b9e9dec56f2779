use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use uuid::Uuid;

use crate::backend::ExecutionBackend;
use crate::error::{ExecutorError, TaskError};
use crate::session_log::SessionLogSet;
use crate::stream::{EventStreamMonitor, TaskOutcome};

use super::expansion::ExpansionSummary;
use super::graph::TaskGraph;
use super::progress::ProgressMonitor;
use super::types::{ExecutionOpts, RunReport, TaskReport, TaskState, WorkRequest};

type InFlight = BoxFuture<'static, (String, Result<TaskOutcome, ExecutorError>)>;

/// Upper bound on waiting for session logs to flush after a run.
pub const SESSION_LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Single control loop that owns task state for one run.
///
/// Every state change goes through [`TaskGraph::transition`] from here. The
/// loop launches ready tasks up to `max_parallel`, then sleeps until at least
/// one in-flight task resolves.
pub struct Scheduler<'a> {
    backend: &'a dyn ExecutionBackend,
    monitor: &'a EventStreamMonitor,
    opts: &'a ExecutionOpts,
    run_id: String,
    session_logs: Option<SessionLogSet>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        backend: &'a dyn ExecutionBackend,
        monitor: &'a EventStreamMonitor,
        opts: &'a ExecutionOpts,
    ) -> Self {
        let run_id = Uuid::new_v4().to_string();
        Self {
            backend,
            monitor,
            opts,
            session_logs: Self::session_logs_for(opts, &run_id),
            run_id,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self.session_logs = Self::session_logs_for(self.opts, &self.run_id);
        self
    }

    fn session_logs_for(opts: &ExecutionOpts, run_id: &str) -> Option<SessionLogSet> {
        opts.session_log
            .clone()
            .map(|log_opts| SessionLogSet::new(log_opts, run_id))
    }

    /// Give up the scheduler, keeping the run's session-log writers so the
    /// caller can drain them once the monitor is shut down.
    pub fn into_session_logs(self) -> Option<SessionLogSet> {
        self.session_logs
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run a graph to completion.
    pub async fn run(&self, graph: TaskGraph) -> Result<RunReport, ExecutorError> {
        self.run_expanded(graph, ExpansionSummary::default()).await
    }

    /// Run a graph whose templates were already resolved.
    pub async fn run_expanded(
        &self,
        mut graph: TaskGraph,
        expansion: ExpansionSummary,
    ) -> Result<RunReport, ExecutorError> {
        graph.freeze()?;

        let started = Instant::now();
        let max_parallel = self.opts.max_parallel.max(1);
        let mut progress = ProgressMonitor::new(graph.len(), self.opts.progress_bar);

        tracing::info!(
            run_id = %self.run_id,
            backend = self.backend.name(),
            tasks = graph.len(),
            max_parallel,
            "run started"
        );

        self.run_primacy(&mut graph, &mut progress).await?;

        let mut in_flight: FuturesUnordered<InFlight> = FuturesUnordered::new();
        // Non-parallelizable task currently running, if any.
        let mut exclusive: Option<String> = None;

        loop {
            if exclusive.is_none() {
                for id in graph.ready_tasks() {
                    if in_flight.len() >= max_parallel {
                        break;
                    }

                    let parallelizable = graph
                        .get(&id)
                        .map(|t| t.definition.parallelizable)
                        .unwrap_or(true);
                    if !parallelizable && !in_flight.is_empty() {
                        // Hold the remaining slots until the in-flight set drains.
                        break;
                    }

                    if let Some(fut) = self.launch(&mut graph, &id, &mut progress).await? {
                        in_flight.push(fut);
                        if !parallelizable {
                            exclusive = Some(id);
                            break;
                        }
                    }
                }
            }

            progress.set_in_flight(in_flight.len(), graph.count(TaskState::Pending));

            if in_flight.is_empty() {
                let stuck = graph.stuck_tasks();
                if !stuck.is_empty() {
                    tracing::error!(run_id = %self.run_id, pending = ?stuck, "deadlock detected");
                    return Err(ExecutorError::Deadlock { pending: stuck });
                }
                break;
            }

            let Some((id, result)) = in_flight.next().await else {
                continue;
            };
            if exclusive.as_deref() == Some(id.as_str()) {
                exclusive = None;
            }
            self.record(&mut graph, &id, result?, &mut progress)?;
        }

        let report = self.build_report(&graph, started, expansion);
        progress.finish(report.success());

        tracing::info!(
            run_id = %self.run_id,
            completed = report.completed_count,
            failed = report.failed_count,
            blocked = report.blocked_count,
            duration_ms = report.overall_duration_ms,
            dropped_events = self.monitor.dropped_unmatched(),
            "run finished"
        );

        Ok(report)
    }

    /// Run the designated seed task alone before the main loop.
    async fn run_primacy(
        &self,
        graph: &mut TaskGraph,
        progress: &mut ProgressMonitor,
    ) -> Result<(), ExecutorError> {
        let Some(name) = self.opts.primacy_task.as_deref() else {
            return Ok(());
        };

        let members: Vec<(String, bool, usize)> = graph
            .members_of(name)
            .iter()
            .map(|t| (t.id.clone(), t.definition.dynamic, t.dependencies().len()))
            .collect();

        let [(id, dynamic, deps)] = members.as_slice() else {
            if members.is_empty() {
                tracing::warn!(task = %name, "primacy task not in graph; skipping");
                return Ok(());
            }
            return Err(ExecutorError::Config(format!(
                "primacy task '{}' expanded into {} instances; it must be a single task",
                name,
                members.len()
            )));
        };
        if *dynamic || *deps > 0 {
            return Err(ExecutorError::Config(format!(
                "primacy task '{}' must be a plain task without dependencies",
                name
            )));
        }

        tracing::info!(task_id = %id, "running primacy task");
        if let Some(fut) = self.launch(graph, id, progress).await? {
            let (id, result) = fut.await;
            self.record(graph, &id, result?, progress)?;
        }

        if graph.get(id).map(|t| t.state) == Some(TaskState::Failed) {
            tracing::warn!(task_id = %id, "primacy task failed; continuing with the rest of the graph");
        }
        Ok(())
    }

    /// Start one ready task.
    ///
    /// The listener is registered between `prepare` and `dispatch`, so no
    /// event about the work can arrive before someone is listening. Returns
    /// `None` when the task could not be started; it is then already
    /// `Failed`.
    async fn launch(
        &self,
        graph: &mut TaskGraph,
        id: &str,
        progress: &mut ProgressMonitor,
    ) -> Result<Option<InFlight>, ExecutorError> {
        let request = graph
            .get(id)
            .map(WorkRequest::for_instance)
            .ok_or_else(|| ExecutorError::UnknownTask(id.to_string()))?;
        let started_at = Utc::now();
        let launched = tokio::time::Instant::now();

        tracing::debug!(task_id = %id, "preparing work");
        let handle = match self.backend.prepare(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!(task_id = %id, error = %message, "backend rejected start request");
                return self.fail_start(graph, id, started_at, message, progress);
            }
        };

        let log = self.session_logs.as_ref().map(|logs| logs.open(id));
        let completion = match self.monitor.register(
            &handle.correlation_id,
            id,
            launched,
            self.opts.task_timeout,
            log,
        ) {
            Ok(completion) => completion,
            Err(ExecutorError::DuplicateCorrelationId(cid)) => {
                tracing::error!(
                    task_id = %id,
                    correlation_id = %cid,
                    "backend handed out a correlation id already in use"
                );
                let message = format!("correlation id '{}' is already in use", cid);
                return self.fail_start(graph, id, started_at, message, progress);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.backend.dispatch(&handle, &request).await {
            let message = format!("{:#}", e);
            tracing::error!(task_id = %id, error = %message, "backend rejected dispatch");
            completion.abandon(TaskError::Spawn {
                message: message.clone(),
            });
            return self.fail_start(graph, id, started_at, message, progress);
        }

        let task = graph.transition(id, TaskState::Running)?;
        task.started_at = Some(started_at);
        task.correlation_id = Some(handle.correlation_id.clone());
        task.metadata = handle.metadata;
        progress.task_started(id);

        tracing::info!(
            task_id = %id,
            correlation_id = %handle.correlation_id,
            "task running"
        );

        let task_id = id.to_string();
        Ok(Some(Box::pin(async move {
            let result = completion.wait().await;
            (task_id, result)
        })))
    }

    /// Record a task that never got going as a spawn failure.
    fn fail_start(
        &self,
        graph: &mut TaskGraph,
        id: &str,
        started_at: chrono::DateTime<Utc>,
        message: String,
        progress: &mut ProgressMonitor,
    ) -> Result<Option<InFlight>, ExecutorError> {
        let task = graph.transition(id, TaskState::Failed)?;
        task.started_at = Some(started_at);
        task.ended_at = Some(Utc::now());
        task.error = Some(TaskError::Spawn { message });
        progress.task_finished(id, false, 0);
        Ok(None)
    }

    fn record(
        &self,
        graph: &mut TaskGraph,
        id: &str,
        outcome: TaskOutcome,
        progress: &mut ProgressMonitor,
    ) -> Result<(), ExecutorError> {
        let success = outcome.success;
        let duration_ms = outcome.duration.as_millis() as u64;
        let to = if success {
            TaskState::Completed
        } else {
            TaskState::Failed
        };

        let task = graph.transition(id, to)?;
        task.ended_at = Some(Utc::now());
        task.error = outcome.error.clone();
        task.outcome = Some(outcome);

        if success {
            tracing::info!(task_id = %id, duration_ms, "task completed");
        } else {
            let error = task.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
            tracing::warn!(task_id = %id, duration_ms, error = %error, "task failed");
        }
        progress.task_finished(id, success, duration_ms);
        Ok(())
    }

    fn build_report(
        &self,
        graph: &TaskGraph,
        started: Instant,
        expansion: ExpansionSummary,
    ) -> RunReport {
        let mut blocked = graph.blocked_tasks();
        let per_task = graph
            .instances()
            .map(|t| {
                let blocked_by = blocked.remove(&t.id).unwrap_or_default();
                (t.id.clone(), TaskReport::from_instance(t, blocked_by))
            })
            .collect::<std::collections::BTreeMap<_, _>>();
        let blocked_count = per_task.values().filter(|r| !r.blocked_by.is_empty()).count();

        RunReport {
            run_id: self.run_id.clone(),
            overall_duration_ms: started.elapsed().as_millis() as u64,
            completed_count: graph.count(TaskState::Completed),
            failed_count: graph.count(TaskState::Failed),
            blocked_count,
            per_task,
            expansion,
        }
    }
}
