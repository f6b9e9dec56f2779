use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub expansion: ExpansionConfig,

    #[serde(default)]
    pub session_log: SessionLogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "taskmesh_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// Execution backend reached over HTTP (opencode-style server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: String,

    #[serde(default = "default_backend_base_url")]
    pub base_url: String,

    /// Timeout for the start-work requests only; the event feed has none.
    #[serde(default = "default_backend_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_backend_kind() -> String {
    "opencode".to_string()
}

fn default_backend_base_url() -> String {
    "http://127.0.0.1:4096".to_string()
}

fn default_backend_request_timeout_ms() -> u64 {
    30_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            base_url: default_backend_base_url(),
            request_timeout_ms: default_backend_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Per-task deadline for a terminal event, counted from launch.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Task run to completion before the main loop starts.
    #[serde(default)]
    pub primacy_task: Option<String>,

    #[serde(default)]
    pub progress_bar: bool,
}

fn default_max_parallel() -> usize {
    4
}

fn default_task_timeout_ms() -> u64 {
    30 * 60 * 1000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            task_timeout_ms: default_task_timeout_ms(),
            primacy_task: None,
            progress_bar: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ExpansionConfig {
    /// No lookup: every dynamic template falls back to a single instance.
    #[default]
    None,
    Http(HttpExpansionConfig),
    File(FileExpansionConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpExpansionConfig {
    pub url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_expansion_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_expansion_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExpansionConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLogConfig {
    pub enabled: bool,
    /// Root directory; each run writes `<directory>/<run_id>/<task_id>.jsonl`,
    /// with the task id percent-encoded.
    pub directory: String,
    pub channel_capacity: usize,
}

impl Default for SessionLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: "./sessions".to_string(),
            channel_capacity: 2048,
        }
    }
}
