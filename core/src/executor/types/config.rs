use std::path::PathBuf;
use std::time::Duration;

use crate::config::{AppConfig, SessionLogConfig};

/// Scheduler options for one run.
#[derive(Debug, Clone)]
pub struct ExecutionOpts {
    /// Maximum number of tasks in flight at once (at least 1)
    pub max_parallel: usize,

    /// Deadline for a terminal event, per task, counted from launch
    pub task_timeout: Duration,

    /// Task run synchronously before the main loop
    pub primacy_task: Option<String>,

    /// Enable visual progress bar
    pub progress_bar: bool,

    /// Per-task session logs; `None` disables them
    pub session_log: Option<SessionLogOpts>,
}

#[derive(Debug, Clone)]
pub struct SessionLogOpts {
    pub directory: PathBuf,
    pub channel_capacity: usize,
}

impl SessionLogOpts {
    pub fn from_config(cfg: &SessionLogConfig) -> Option<Self> {
        if !cfg.enabled || cfg.directory.trim().is_empty() {
            return None;
        }
        Some(Self {
            directory: PathBuf::from(&cfg.directory),
            channel_capacity: cfg.channel_capacity.max(1),
        })
    }
}

impl Default for ExecutionOpts {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            task_timeout: Duration::from_secs(30 * 60),
            primacy_task: None,
            progress_bar: false,
            session_log: None,
        }
    }
}

impl ExecutionOpts {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_parallel: cfg.executor.max_parallel.max(1),
            task_timeout: Duration::from_millis(cfg.executor.task_timeout_ms),
            primacy_task: cfg
                .executor
                .primacy_task
                .clone()
                .filter(|s| !s.trim().is_empty()),
            progress_bar: cfg.executor.progress_bar,
            session_log: SessionLogOpts::from_config(&cfg.session_log),
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_primacy_task(mut self, name: impl Into<String>) -> Self {
        self.primacy_task = Some(name.into());
        self
    }

    pub fn with_session_log(mut self, directory: impl Into<PathBuf>) -> Self {
        self.session_log = Some(SessionLogOpts {
            directory: directory.into(),
            channel_capacity: 2048,
        });
        self
    }
}
