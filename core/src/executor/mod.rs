//! Task graph orchestration: dependency resolution, dynamic expansion and
//! concurrency-bounded dispatch.

pub mod engine;
pub mod expansion;
pub mod graph;
pub mod progress;
pub mod scheduler;
pub mod types;

pub use engine::{ExecutionEngine, ExecutionEngineBuilder};
pub use expansion::{ExpansionOutcome, ExpansionResolver, ExpansionSummary};
pub use graph::TaskGraph;
pub use progress::ProgressMonitor;
pub use scheduler::{Scheduler, SESSION_LOG_DRAIN_TIMEOUT};
pub use types::*;
