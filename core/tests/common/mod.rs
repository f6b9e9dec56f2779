#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use serde_json::json;

use taskmesh_core::api::{
    EventFeed, EventRecord, EventStream, ExecutionBackend, ExecutionEngine, ExecutionHandle,
    ExecutionOpts, ExecutorError, ExpansionLookup, ExpansionRequirement, ResourceUsage,
    RunParameters, RunReport, TaskDefinition, WorkRequest,
};

pub type FeedTx = mpsc::UnboundedSender<anyhow::Result<EventRecord>>;

/// What the fake backend does for one task.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit one operation per category, then terminal success.
    Succeed {
        ops: Vec<&'static str>,
        after: Duration,
    },
    /// Emit terminal error after the delay.
    Fail { message: String, after: Duration },
    /// Accept the work but never emit a terminal event.
    Silent,
    /// Reject the start request.
    RejectStart(String),
    /// Prepare fine, then reject the dispatch.
    RejectDispatch(String),
    /// Report one operation and a terminal error before dispatch returns.
    FailBeforeReturn(String),
}

impl Script {
    pub fn ok(after_ms: u64) -> Self {
        Self::Succeed {
            ops: vec!["bash"],
            after: Duration::from_millis(after_ms),
        }
    }

    pub fn fail(message: &str, after_ms: u64) -> Self {
        Self::Fail {
            message: message.to_string(),
            after: Duration::from_millis(after_ms),
        }
    }
}

/// Backend double that drives the shared feed from a per-task script.
pub struct ScriptedBackend {
    feed: FeedTx,
    scripts: Mutex<HashMap<String, Script>>,
    aliases: Mutex<HashMap<String, String>>,
    journal: Arc<Mutex<Vec<String>>>,
    requests: Mutex<Vec<WorkRequest>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn script(&self, task_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), script);
    }

    /// Hand out `correlation_id` for `task_id` instead of the default.
    pub fn alias(&self, task_id: &str, correlation_id: &str) {
        self.aliases
            .lock()
            .unwrap()
            .insert(task_id.to_string(), correlation_id.to_string());
    }

    fn script_for(&self, task_id: &str) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| Script::ok(15))
    }

    /// Ordered "start:<id>" / "done:<id>" entries.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.journal().iter().position(|e| e == entry)
    }

    pub fn started(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    pub fn requests(&self) -> Vec<WorkRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// End the shared feed, as if the server hung up.
    pub fn close_feed(&self) {
        self.feed.close_channel();
    }

    /// Push an arbitrary record into the shared feed.
    pub fn emit(&self, event: EventRecord) {
        let _ = self.feed.unbounded_send(Ok(event));
    }
}

pub fn correlation_for(task_id: &str) -> String {
    format!("ses-{}", task_id)
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn prepare(&self, request: &WorkRequest) -> anyhow::Result<ExecutionHandle> {
        let task_id = &request.task_id;
        if let Script::RejectStart(message) = self.script_for(task_id) {
            anyhow::bail!("{}", message);
        }

        let correlation_id = self
            .aliases
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| correlation_for(task_id));
        Ok(ExecutionHandle::new(correlation_id, task_id.clone())
            .with_metadata(json!({ "backend": "scripted", "task": task_id })))
    }

    async fn dispatch(
        &self,
        handle: &ExecutionHandle,
        request: &WorkRequest,
    ) -> anyhow::Result<()> {
        let task_id = request.task_id.clone();
        let script = self.script_for(&task_id);
        let cid = handle.correlation_id.clone();

        match &script {
            Script::RejectDispatch(message) => anyhow::bail!("{}", message),
            Script::FailBeforeReturn(message) => {
                self.requests.lock().unwrap().push(request.clone());
                self.journal.lock().unwrap().push(format!("start:{}", task_id));
                self.emit(EventRecord::started(&cid, "read"));
                self.emit(EventRecord::failure(&cid, message.clone()));
                self.journal.lock().unwrap().push(format!("done:{}", task_id));
                // Let the pump see the events before the caller hears back.
                tokio::time::sleep(Duration::from_millis(5)).await;
                return Ok(());
            }
            _ => {}
        }

        self.requests.lock().unwrap().push(request.clone());
        self.journal.lock().unwrap().push(format!("start:{}", task_id));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let feed = self.feed.clone();
        let journal = self.journal.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            match script {
                Script::Succeed { ops, after } => {
                    tokio::time::sleep(after / 2).await;
                    for op in ops {
                        let _ = feed.unbounded_send(Ok(EventRecord::started(&cid, op)));
                    }
                    let _ = feed.unbounded_send(Ok(EventRecord::completed(&cid)
                        .with_usage(ResourceUsage::new(100, 40, 10))
                        .with_cost(0.01)));
                    tokio::time::sleep(after / 2).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    journal.lock().unwrap().push(format!("done:{}", task_id));
                    let _ = feed.unbounded_send(Ok(EventRecord::success(&cid)));
                }
                Script::Fail { message, after } => {
                    tokio::time::sleep(after).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    journal.lock().unwrap().push(format!("done:{}", task_id));
                    let _ = feed.unbounded_send(Ok(EventRecord::failure(&cid, message)));
                }
                Script::Silent
                | Script::RejectStart(_)
                | Script::RejectDispatch(_)
                | Script::FailBeforeReturn(_) => {}
            }
        });

        Ok(())
    }
}

/// Event feed backed by an in-memory channel.
pub struct ChannelFeed {
    rx: mpsc::UnboundedReceiver<anyhow::Result<EventRecord>>,
}

#[async_trait]
impl EventFeed for ChannelFeed {
    fn name(&self) -> &str {
        "channel"
    }

    async fn subscribe(self: Box<Self>) -> anyhow::Result<EventStream> {
        Ok(Box::pin(self.rx))
    }
}

pub fn harness() -> (Arc<ScriptedBackend>, ChannelFeed) {
    let (tx, rx) = mpsc::unbounded();
    let backend = Arc::new(ScriptedBackend {
        feed: tx,
        scripts: Mutex::new(HashMap::new()),
        aliases: Mutex::new(HashMap::new()),
        journal: Arc::new(Mutex::new(Vec::new())),
        requests: Mutex::new(Vec::new()),
        active: Arc::new(AtomicUsize::new(0)),
        max_active: Arc::new(AtomicUsize::new(0)),
    });
    (backend, ChannelFeed { rx })
}

/// Lookup double returning fixed requirements, or an error, per template.
#[derive(Default)]
pub struct StaticLookup {
    results: HashMap<String, Result<Vec<ExpansionRequirement>, String>>,
}

impl StaticLookup {
    pub fn with(mut self, template: &str, ids: &[&str]) -> Self {
        self.results.insert(
            template.to_string(),
            Ok(ids.iter().map(|id| ExpansionRequirement::new(*id)).collect()),
        );
        self
    }

    pub fn failing(mut self, template: &str, message: &str) -> Self {
        self.results
            .insert(template.to_string(), Err(message.to_string()));
        self
    }
}

#[async_trait]
impl ExpansionLookup for StaticLookup {
    fn name(&self) -> &str {
        "static"
    }

    async fn lookup(
        &self,
        template: &str,
        _params: &RunParameters,
    ) -> anyhow::Result<Vec<ExpansionRequirement>> {
        match self.results.get(template) {
            Some(Ok(reqs)) => Ok(reqs.clone()),
            Some(Err(message)) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(Vec::new()),
        }
    }
}

pub fn task(name: &str, deps: &[&str]) -> TaskDefinition {
    TaskDefinition::new(name)
        .with_dependencies(deps.iter().copied())
        .with_instructions(format!("do {}", name))
}

pub fn opts(max_parallel: usize) -> ExecutionOpts {
    ExecutionOpts::default()
        .with_max_parallel(max_parallel)
        .with_task_timeout(Duration::from_secs(5))
}

/// Route engine logs to the test harness; `RUST_LOG` picks the level.
pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn run(
    definitions: Vec<TaskDefinition>,
    backend: Arc<ScriptedBackend>,
    feed: ChannelFeed,
    opts: ExecutionOpts,
    lookup: Option<StaticLookup>,
) -> Result<RunReport, ExecutorError> {
    init_logs();
    let mut builder = ExecutionEngine::builder(backend, Box::new(feed))
        .opts(opts)
        .run_id("test-run");
    if let Some(lookup) = lookup {
        builder = builder.expansion_lookup(Arc::new(lookup));
    }
    builder
        .build()
        .run(definitions, &RunParameters::new())
        .await
}
