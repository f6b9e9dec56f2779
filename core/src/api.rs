//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `taskmesh_core::api` instead of reaching into internal modules.

pub use crate::backend::{
    ExecutionBackend, ExecutionHandle, ExpansionLookup, RunParameters,
};
pub use crate::config::{
    get_taskmesh_data_dir, load_default, load_from_path, AppConfig, BackendConfig,
    ExecutorConfig, ExpansionConfig, FileExpansionConfig, HttpExpansionConfig, LoggingConfig,
    SessionLogConfig,
};
pub use crate::error::{CliError, ExecutorError, ExpansionLookupError, TaskError};
pub use crate::executor::{
    ExecutionEngine, ExecutionEngineBuilder, ExecutionOpts, ExpansionOutcome, ExpansionRequirement,
    ExpansionResolver, ExpansionSummary, RunReport, Scheduler, SessionLogOpts, TaskDefinition,
    TaskGraph, TaskInstance, TaskReport, TaskState, WorkRequest, EXPANSION_SEPARATOR,
};
pub use crate::session_log::{start_session_log, SessionLogSet, SessionLogTx};
pub use crate::stream::{
    Completion, EventFeed, EventKind, EventRecord, EventStream, EventStreamMonitor, ListenerPhase,
    ResourceUsage, StatsSnapshot, TaskOutcome,
};
