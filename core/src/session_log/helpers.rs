use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;

use crate::stream::{EventRecord, StatsSnapshot};

use super::writer::SessionLogTx;

#[derive(Serialize)]
struct SessionSummary<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: DateTime<Utc>,
    task_id: &'a str,
    duration_ms: u64,
    outcome: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    stats: &'a StatsSnapshot,
}

pub fn write_event(out: Option<&SessionLogTx>, ev: &EventRecord) {
    let Some(out) = out else {
        return;
    };
    if let Ok(line) = serde_json::to_string(ev) {
        out.send_line(line);
    }
}

pub fn write_summary(
    out: Option<&SessionLogTx>,
    task_id: &str,
    duration_ms: u64,
    outcome: &str,
    error: Option<&str>,
    stats: &StatsSnapshot,
) {
    let Some(out) = out else {
        return;
    };
    let summary = SessionSummary {
        kind: "summary",
        timestamp: Utc::now(),
        task_id,
        duration_ms,
        outcome,
        error,
        stats,
    };
    if let Ok(line) = serde_json::to_string(&summary) {
        out.send_line(line);
    }
}

/// Bytes kept as-is in log file names; everything else is `%XX`-encoded,
/// which keeps distinct task ids on distinct files.
const FILE_NAME_SAFE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// File name for a task's log.
pub fn log_file_name(task_id: &str) -> String {
    format!("{}.jsonl", utf8_percent_encode(task_id, FILE_NAME_SAFE))
}
