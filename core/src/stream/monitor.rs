//! Correlates the single global event feed back to registered tasks.
//!
//! One subscription per run feeds a pump task. Each launched task registers a
//! listener keyed by its correlation id and receives a [`Completion`]; the pump
//! folds matching events into the listener's stats and resolves the completion
//! on the first terminal event. Everything else is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ExecutorError, TaskError};
use crate::session_log::{self, SessionLogTx};

use super::stats::StatsSnapshot;
use super::traits::{EventFeed, EventStream};
use super::types::{EventKind, EventRecord};

/// Lifecycle of one listener.
///
/// A listener is registered before its work is dispatched and sits in
/// `AwaitingStart` until the first event for it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerPhase {
    AwaitingStart,
    Collecting,
    TerminalSuccess,
    TerminalError,
    TimedOut,
}

impl ListenerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingStart => "awaiting-start",
            Self::Collecting => "collecting",
            Self::TerminalSuccess => "success",
            Self::TerminalError => "error",
            Self::TimedOut => "timed-out",
        }
    }
}

/// Final result of one task's listener.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub phase: ListenerPhase,
    pub duration: Duration,
    /// Frozen at the terminal transition
    pub stats: StatsSnapshot,
    pub error: Option<TaskError>,
}

enum Resolution {
    Outcome(TaskOutcome),
    Closed(String),
}

struct Listener {
    task_id: String,
    phase: ListenerPhase,
    started: Instant,
    stats: StatsSnapshot,
    log: Option<SessionLogTx>,
    done: oneshot::Sender<Resolution>,
}

impl Listener {
    fn observe(&mut self, event: &EventRecord) {
        if self.phase == ListenerPhase::AwaitingStart {
            self.phase = ListenerPhase::Collecting;
        }
        self.stats = std::mem::take(&mut self.stats).apply(event);
        session_log::write_event(self.log.as_ref(), event);
    }

    /// Freeze the snapshot and build the outcome. The sender is handed back
    /// so the caller decides whether anyone still needs to be told.
    fn finish(
        self,
        phase: ListenerPhase,
        error: Option<TaskError>,
    ) -> (TaskOutcome, oneshot::Sender<Resolution>) {
        let duration = self.started.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let error_text = error.as_ref().map(|e| e.to_string());

        self.stats
            .log_summary(&self.task_id, phase.as_str(), duration_ms);
        session_log::write_summary(
            self.log.as_ref(),
            &self.task_id,
            duration_ms,
            phase.as_str(),
            error_text.as_deref(),
            &self.stats,
        );
        if let Some(log) = self.log.as_ref().filter(|l| l.dropped_count() > 0) {
            tracing::warn!(
                task_id = %self.task_id,
                path = %log.path().display(),
                dropped = log.dropped_count(),
                "session log fell behind; lines were dropped"
            );
        }

        let outcome = TaskOutcome {
            success: phase == ListenerPhase::TerminalSuccess,
            phase,
            duration,
            stats: self.stats,
            error,
        };
        (outcome, self.done)
    }
}

#[derive(Default)]
struct MonitorState {
    listeners: HashMap<String, Listener>,
    closed: Option<String>,
}

#[derive(Default)]
struct MonitorShared {
    state: Mutex<MonitorState>,
    dropped_unmatched: AtomicU64,
    applied: AtomicU64,
}

impl MonitorShared {
    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, event: EventRecord) {
        let mut state = self.lock_state();

        if event.kind.is_terminal() {
            let Some(listener) = state.listeners.remove(&event.correlation_id) else {
                self.drop_unmatched(&event);
                return;
            };
            let (phase, error) = match event.kind {
                EventKind::TerminalSuccess => (ListenerPhase::TerminalSuccess, None),
                _ => (
                    ListenerPhase::TerminalError,
                    Some(TaskError::BackendReported {
                        message: event
                            .error
                            .clone()
                            .unwrap_or_else(|| "unspecified error".to_string()),
                    }),
                ),
            };
            session_log::write_event(listener.log.as_ref(), &event);
            tracing::debug!(
                task_id = %listener.task_id,
                correlation_id = %event.correlation_id,
                phase = phase.as_str(),
                "listener resolved"
            );
            let (outcome, done) = listener.finish(phase, error);
            let _ = done.send(Resolution::Outcome(outcome));
            return;
        }

        match state.listeners.get_mut(&event.correlation_id) {
            Some(listener) => {
                listener.observe(&event);
                self.applied.fetch_add(1, Ordering::Relaxed);
            }
            None => self.drop_unmatched(&event),
        }
    }

    fn drop_unmatched(&self, event: &EventRecord) {
        self.dropped_unmatched.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            correlation_id = %event.correlation_id,
            kind = event.kind.as_str(),
            "dropping event with no registered listener"
        );
    }

    /// Close the monitor; every waiting completion resolves with `reason`.
    fn close(&self, reason: String) {
        let mut state = self.lock_state();
        if state.closed.is_some() {
            return;
        }
        let pending = state.listeners.len();
        for (_, listener) in state.listeners.drain() {
            let _ = listener.done.send(Resolution::Closed(reason.clone()));
        }
        if pending > 0 {
            tracing::error!(reason = %reason, pending, "event feed closed with tasks in flight");
        } else {
            tracing::debug!(reason = %reason, "event feed closed");
        }
        state.closed = Some(reason);
    }
}

/// Owner of the run's single event subscription.
pub struct EventStreamMonitor {
    shared: Arc<MonitorShared>,
    pump: Option<JoinHandle<()>>,
}

impl EventStreamMonitor {
    /// Subscribe once and start delivering events to listeners.
    pub async fn start(feed: Box<dyn EventFeed>) -> Result<Self, ExecutorError> {
        let name = feed.name().to_string();
        let stream = feed
            .subscribe()
            .await
            .map_err(|e| ExecutorError::Subscribe(format!("{}: {:#}", name, e)))?;
        tracing::debug!(feed = %name, "event feed subscribed");
        Ok(Self::from_stream(stream))
    }

    /// Start from an already-open stream.
    pub fn from_stream(stream: EventStream) -> Self {
        let shared = Arc::new(MonitorShared::default());
        let pump = tokio::spawn(pump(shared.clone(), stream));
        Self {
            shared,
            pump: Some(pump),
        }
    }

    /// Register the listener for a task about to be dispatched.
    ///
    /// `started` is when the launch began; both the deadline and the reported
    /// duration count from it.
    pub fn register(
        &self,
        correlation_id: &str,
        task_id: &str,
        started: Instant,
        timeout: Duration,
        log: Option<SessionLogTx>,
    ) -> Result<Completion, ExecutorError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.shared.lock_state();

        if let Some(reason) = &state.closed {
            return Err(ExecutorError::FeedClosed(reason.clone()));
        }
        if state.listeners.contains_key(correlation_id) {
            return Err(ExecutorError::DuplicateCorrelationId(
                correlation_id.to_string(),
            ));
        }

        let listener = Listener {
            task_id: task_id.to_string(),
            phase: ListenerPhase::AwaitingStart,
            started,
            stats: StatsSnapshot::default(),
            log,
            done: tx,
        };
        state
            .listeners
            .insert(correlation_id.to_string(), listener);

        tracing::debug!(
            task_id = %task_id,
            correlation_id = %correlation_id,
            timeout_ms = timeout.as_millis() as u64,
            "listener registered"
        );

        Ok(Completion {
            shared: self.shared.clone(),
            correlation_id: correlation_id.to_string(),
            deadline: started + timeout,
            timeout,
            rx,
        })
    }

    /// Current phase of the listener for `correlation_id`, if still registered.
    pub fn listener_phase(&self, correlation_id: &str) -> Option<ListenerPhase> {
        self.shared
            .lock_state()
            .listeners
            .get(correlation_id)
            .map(|l| l.phase)
    }

    pub fn active_listeners(&self) -> usize {
        self.shared.lock_state().listeners.len()
    }

    /// Events dropped because no listener matched their correlation id.
    pub fn dropped_unmatched(&self) -> u64 {
        self.shared.dropped_unmatched.load(Ordering::Relaxed)
    }

    /// Non-terminal events applied to a listener.
    pub fn applied_events(&self) -> u64 {
        self.shared.applied.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().closed.is_some()
    }

    /// Stop the pump and release the subscription.
    pub fn shutdown(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.shared.close("monitor shut down".to_string());
    }
}

impl Drop for EventStreamMonitor {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump(shared: Arc<MonitorShared>, mut stream: EventStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => shared.dispatch(event),
            Err(e) => {
                shared.close(format!("transport error: {:#}", e));
                return;
            }
        }
    }
    shared.close("event feed ended".to_string());
}

/// Resolves when the task's listener reaches a terminal phase.
pub struct Completion {
    shared: Arc<MonitorShared>,
    correlation_id: String,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<Resolution>,
}

impl Completion {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Give up on a listener whose work never started.
    ///
    /// The listener is closed with `error` so its session log still gets a
    /// summary. Returns `false` if it had already resolved.
    pub fn abandon(self, error: TaskError) -> bool {
        let listener = self
            .shared
            .lock_state()
            .listeners
            .remove(&self.correlation_id);
        let Some(listener) = listener else {
            return false;
        };
        tracing::debug!(
            task_id = %listener.task_id,
            correlation_id = %self.correlation_id,
            "listener abandoned"
        );
        let _ = listener.finish(ListenerPhase::TerminalError, Some(error));
        true
    }

    /// Wait for the terminal outcome or the task deadline.
    ///
    /// A timeout still yields `Ok` with a failed outcome; `Err` means the feed
    /// closed and the run cannot continue.
    pub async fn wait(mut self) -> Result<TaskOutcome, ExecutorError> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(resolution) => resolve(resolution.ok()),
            Err(_) => {
                let expired = self
                    .shared
                    .lock_state()
                    .listeners
                    .remove(&self.correlation_id);
                match expired {
                    Some(listener) => {
                        let timeout_ms = self.timeout.as_millis() as u64;
                        tracing::warn!(
                            task_id = %listener.task_id,
                            correlation_id = %self.correlation_id,
                            timeout_ms,
                            "no terminal event before deadline"
                        );
                        let (outcome, _) = listener.finish(
                            ListenerPhase::TimedOut,
                            Some(TaskError::StreamTimeout { timeout_ms }),
                        );
                        Ok(outcome)
                    }
                    // The pump resolved it under the lock before we got there.
                    None => resolve(self.rx.try_recv().ok()),
                }
            }
        }
    }
}

fn resolve(resolution: Option<Resolution>) -> Result<TaskOutcome, ExecutorError> {
    match resolution {
        Some(Resolution::Outcome(outcome)) => Ok(outcome),
        Some(Resolution::Closed(reason)) => Err(ExecutorError::FeedClosed(reason)),
        None => Err(ExecutorError::FeedClosed(
            "monitor dropped before the task resolved".to_string(),
        )),
    }
}
