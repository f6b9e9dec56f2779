pub mod monitor;
pub mod stats;
pub mod traits;
pub mod types;

pub use monitor::{Completion, EventStreamMonitor, ListenerPhase, TaskOutcome};
pub use stats::StatsSnapshot;
pub use traits::{EventFeed, EventStream};
pub use types::{EventKind, EventRecord, ResourceUsage};
