//! Human-readable and JSON rendering of a finished run.
use std::fmt::Write as _;
use std::path::Path;

use taskmesh_core::api::{ExpansionOutcome, RunReport, TaskState};

pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "run {}: {} completed, {} failed, {} blocked in {}ms",
        report.run_id,
        report.completed_count,
        report.failed_count,
        report.blocked_count,
        report.overall_duration_ms
    );

    for (template, outcome) in &report.expansion.templates {
        match outcome {
            ExpansionOutcome::Expanded { instances } => {
                let _ = writeln!(out, "  expanded {} into {} tasks", template, instances.len());
            }
            ExpansionOutcome::FellBack { reason } => {
                let _ = writeln!(out, "  {} ran unexpanded: {}", template, reason);
            }
        }
    }

    for (id, task) in &report.per_task {
        let marker = match task.state {
            TaskState::Completed => "ok",
            TaskState::Failed => "FAIL",
            TaskState::Pending if !task.blocked_by.is_empty() => "blocked",
            state => state.as_str(),
        };
        let _ = write!(out, "  [{:>7}] {}", marker, id);
        if let Some(ms) = task.duration_ms {
            let _ = write!(out, " {}ms", ms);
        }
        if task.stats.operation_count > 0 {
            let _ = write!(
                out,
                " ops={} tokens={}",
                task.stats.operation_count,
                task.stats.total_tokens()
            );
        }
        if let Some(err) = &task.error {
            let _ = write!(out, " error: {}", err);
        }
        if !task.blocked_by.is_empty() {
            let _ = write!(out, " (by {})", task.blocked_by.join(", "));
        }
        out.push('\n');
    }
    out
}

pub fn write_report_json(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}
