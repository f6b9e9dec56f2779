//! CLI assembly layer: merges command-line overrides into the config, builds
//! the collaborators and runs the engine.
use std::time::Duration;

use taskmesh_core::api::{AppConfig, CliError, ExecutionEngine, ExecutionOpts, TaskGraph};
use taskmesh_plugins::factory;
use taskmesh_plugins::plan::{load_plan, RunPlan};

use crate::commands::cli::{RunArgs, ValidateArgs};
use crate::report::{format_report, write_report_json};

/// Exit code for a run that finished but had failed tasks.
pub const EXIT_TASKS_FAILED: i32 = 1;

fn apply_overrides(cfg: &mut AppConfig, args: &RunArgs) {
    if let Some(n) = args.max_parallel {
        cfg.executor.max_parallel = n.max(1);
    }
    if let Some(secs) = args.timeout_secs {
        cfg.executor.task_timeout_ms = Duration::from_secs(secs).as_millis() as u64;
    }
    if let Some(name) = args.primacy.as_deref().filter(|s| !s.trim().is_empty()) {
        cfg.executor.primacy_task = Some(name.to_string());
    }
    if args.progress {
        cfg.executor.progress_bar = true;
    }
    if let Some(url) = args.backend_url.as_deref().filter(|s| !s.trim().is_empty()) {
        cfg.backend.base_url = url.to_string();
    }
}

fn read_plan(path: &std::path::Path) -> Result<RunPlan, CliError> {
    let plan = load_plan(path).map_err(|e| CliError::Plan(format!("{:#}", e)))?;
    for (task, dep) in plan.unknown_dependencies() {
        tracing::warn!(task = %task, dependency = %dep, "dependency names no task; treating it as satisfied");
    }
    Ok(plan)
}

#[tracing::instrument(name = "cli.run", skip(args, cfg), fields(plan = %args.plan.display()))]
pub async fn run_plan(args: RunArgs, mut cfg: AppConfig) -> Result<i32, CliError> {
    apply_overrides(&mut cfg, &args);

    let plan = read_plan(&args.plan)?
        .with_param_overrides(&args.params)
        .map_err(|e| CliError::Plan(e.to_string()))?;

    let backend = factory::build_backend(&cfg).map_err(|e| CliError::Config(e.to_string()))?;
    let feed = factory::build_event_feed(&cfg).map_err(|e| CliError::Config(e.to_string()))?;
    let lookup =
        factory::build_expansion_lookup(&cfg).map_err(|e| CliError::Config(e.to_string()))?;

    let mut builder = ExecutionEngine::builder(backend, feed).opts(ExecutionOpts::from_config(&cfg));
    if let Some(lookup) = lookup {
        builder = builder.expansion_lookup(lookup);
    }

    let report = builder.build().run(plan.definitions, &plan.params).await?;

    print!("{}", format_report(&report));
    if let Some(path) = &args.report {
        write_report_json(&report, path)?;
        tracing::info!(path = %path.display(), "run report written");
    }

    Ok(if report.success() { 0 } else { EXIT_TASKS_FAILED })
}

pub fn validate_plan(args: ValidateArgs) -> Result<i32, CliError> {
    let plan = read_plan(&args.plan)?;
    let dynamic = plan.definitions.iter().filter(|d| d.dynamic).count();
    let total = plan.definitions.len();

    // Freezing validates; unexpanded templates count as single tasks.
    let graph = TaskGraph::build(plan.definitions)?;

    println!(
        "plan ok: {} tasks ({} dynamic), {} ready at start",
        total,
        dynamic,
        graph.ready_tasks().len()
    );
    Ok(0)
}
