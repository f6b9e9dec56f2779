use thiserror::Error;

use super::executor::ExecutorError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("run failed: {0}")]
    Executor(#[from] ExecutorError),
    #[error("config error: {0}")]
    Config(String),
    #[error("plan error: {0}")]
    Plan(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
