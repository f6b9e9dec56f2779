//! Maps opencode server events onto normalized [`EventRecord`]s.
//!
//! Best effort: malformed JSON and event types with no meaning for task
//! progress yield `None`.

use std::collections::HashSet;

use serde_json::{json, Value};

use taskmesh_core::api::{EventKind, EventRecord, ResourceUsage};

/// Stateful parser; remembers which tool calls were already seen running so
/// repeated `running` updates count once.
#[derive(Debug, Default)]
pub struct OpencodeEventParser {
    running_calls: HashSet<String>,
}

impl OpencodeEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one SSE `data:` payload.
    pub fn parse_data(&mut self, data: &str) -> Option<EventRecord> {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return None;
        }
        let v: Value = serde_json::from_str(trimmed).ok()?;
        self.parse_value(&v)
    }

    pub fn parse_value(&mut self, v: &Value) -> Option<EventRecord> {
        let event_type = v.get("type").and_then(Value::as_str)?;
        let properties = v.get("properties").unwrap_or(&Value::Null);

        match event_type {
            "session.idle" => {
                let session_id = extract_session_id(v)?;
                Some(
                    EventRecord::new(EventKind::TerminalSuccess, session_id)
                        .with_payload(json!({ "event": event_type })),
                )
            }
            "session.error" => {
                let session_id = extract_session_id(v)?;
                let message = properties
                    .pointer("/error/data/message")
                    .and_then(Value::as_str)
                    .or_else(|| properties.pointer("/error/name").and_then(Value::as_str))
                    .unwrap_or("Unknown error");
                Some(
                    EventRecord::failure(session_id, message)
                        .with_payload(json!({ "event": event_type })),
                )
            }
            "message.part.updated" => self.parse_part(v, properties.get("part")?),
            _ => None,
        }
    }

    fn parse_part(&mut self, event: &Value, part: &Value) -> Option<EventRecord> {
        let session_id = extract_session_id(event)?;
        match part.get("type").and_then(Value::as_str)? {
            "tool" => self.parse_tool(session_id, part),
            "step-finish" => Some(parse_step_finish(session_id, part)),
            _ => None,
        }
    }

    fn parse_tool(&mut self, session_id: String, part: &Value) -> Option<EventRecord> {
        let tool = part
            .get("tool")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let call_id = part
            .get("callID")
            .or_else(|| part.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let key = format!("{}/{}", session_id, call_id);
        let status = part.pointer("/state/status").and_then(Value::as_str)?;

        match status {
            "running" => {
                if !self.running_calls.insert(key) {
                    return None;
                }
                Some(
                    EventRecord::started(session_id, tool.clone())
                        .with_payload(json!({ "tool": tool, "call_id": call_id })),
                )
            }
            "completed" | "error" => {
                self.running_calls.remove(&key);
                let mut ev = EventRecord::completed(session_id)
                    .with_payload(json!({ "tool": tool, "call_id": call_id, "status": status }));
                if status == "error" {
                    if let Some(err) = part.pointer("/state/error").and_then(Value::as_str) {
                        ev = ev.with_error(err);
                    }
                }
                Some(ev)
            }
            _ => None,
        }
    }

    pub fn pending_calls(&self) -> usize {
        self.running_calls.len()
    }
}

fn parse_step_finish(session_id: String, part: &Value) -> EventRecord {
    let tokens = part.get("tokens").unwrap_or(&Value::Null);
    let count = |key: &str| tokens.get(key).and_then(Value::as_u64).unwrap_or(0);
    let usage = ResourceUsage::new(count("input"), count("output"), count("reasoning"));

    let mut ev = EventRecord::completed(session_id)
        .with_usage(usage)
        .with_payload(json!({ "step": "finish" }));
    if let Some(cost) = part.get("cost").and_then(Value::as_f64) {
        ev = ev.with_cost(cost);
    }
    ev
}

/// Session id an opencode event belongs to.
pub fn extract_session_id(event: &Value) -> Option<String> {
    let properties = event.get("properties")?;

    let candidates = [
        properties.get("sessionID"),
        properties.get("sessionId"),
        properties.pointer("/info/id"),
        properties.pointer("/info/sessionID"),
        properties.pointer("/part/sessionID"),
        properties.pointer("/part/sessionId"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
