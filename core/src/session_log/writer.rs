use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::executor::types::SessionLogOpts;

use super::helpers::log_file_name;

/// Sending half of one task's session log.
///
/// Sends never wait: when the writer falls behind, lines are dropped and
/// counted.
#[derive(Clone)]
pub struct SessionLogTx {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
    path: Arc<PathBuf>,
}

impl SessionLogTx {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn send_line(&self, line: String) {
        if self.tx.try_send(line).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Spawn the writer for `<directory>/<run_id>/<log_file_name(task_id)>`.
///
/// Must be called from within a tokio runtime. The writer exits once every
/// sender is dropped and the channel is drained; join the returned handle to
/// know the file is complete.
pub fn start_session_log(
    opts: &SessionLogOpts,
    run_id: &str,
    task_id: &str,
) -> (SessionLogTx, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<String>(opts.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let path = opts.directory.join(run_id).join(log_file_name(task_id));
    let writer_path = path.clone();

    let writer = tokio::spawn(async move {
        if let Some(parent) = writer_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::debug!(path = %writer_path.display(), error = %e, "session log disabled");
                return;
            }
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&writer_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(path = %writer_path.display(), error = %e, "session log disabled");
                return;
            }
        };

        while let Some(mut line) = rx.recv().await {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if file.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }

        let _ = file.flush().await;
    });

    let log = SessionLogTx {
        tx,
        dropped,
        path: Arc::new(path),
    };
    (log, writer)
}

/// The session logs of one run, with their writers kept joinable.
pub struct SessionLogSet {
    opts: SessionLogOpts,
    run_id: String,
    writers: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionLogSet {
    pub fn new(opts: SessionLogOpts, run_id: impl Into<String>) -> Self {
        Self {
            opts,
            run_id: run_id.into(),
            writers: Mutex::new(Vec::new()),
        }
    }

    pub fn run_dir(&self) -> PathBuf {
        self.opts.directory.join(&self.run_id)
    }

    /// Open the log for `task_id`.
    pub fn open(&self, task_id: &str) -> SessionLogTx {
        let (log, writer) = start_session_log(&self.opts, &self.run_id, task_id);
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(writer);
        log
    }

    /// Wait for every writer to flush, giving up after `timeout`.
    ///
    /// Writers only finish once their senders are gone, so call this after
    /// the listeners holding them have resolved. Returns `false` on timeout;
    /// unfinished writers keep running detached.
    pub async fn drain(self, timeout: Duration) -> bool {
        let writers = self
            .writers
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if writers.is_empty() {
            return true;
        }

        let pending = writers.len();
        match tokio::time::timeout(timeout, join_all(writers)).await {
            Ok(_) => {
                tracing::debug!(run_id = %self.run_id, logs = pending, "session logs flushed");
                true
            }
            Err(_) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    logs = pending,
                    timeout_ms = timeout.as_millis() as u64,
                    "session logs still writing at shutdown"
                );
                false
            }
        }
    }
}
