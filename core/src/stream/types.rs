use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an event says about the work behind its correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    OperationStarted,
    OperationCompleted,
    TerminalSuccess,
    TerminalError,
}

impl EventKind {
    /// A terminal event means no further progress will be reported.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TerminalSuccess | Self::TerminalError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OperationStarted => "operation-started",
            Self::OperationCompleted => "operation-completed",
            Self::TerminalSuccess => "terminal-success",
            Self::TerminalError => "terminal-error",
        }
    }
}

/// Resource-usage deltas carried by an event, or totals in a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

impl ResourceUsage {
    pub fn new(input_tokens: u64, output_tokens: u64, reasoning_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            reasoning_tokens,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.reasoning_tokens == 0
    }

    pub fn saturating_add(self, other: ResourceUsage) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            reasoning_tokens: self.reasoning_tokens.saturating_add(other.reasoning_tokens),
        }
    }
}

/// One normalized message from the global event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,

    pub correlation_id: String,

    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Operation category (tool name) for operation events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResourceUsage>,

    /// Monetary cost delta reported alongside `usage`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl EventRecord {
    pub fn new(kind: EventKind, correlation_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id: correlation_id.into(),
            kind,
            category: None,
            usage: None,
            cost: None,
            error: None,
            payload: Value::Null,
        }
    }

    pub fn started(correlation_id: impl Into<String>, category: impl Into<String>) -> Self {
        Self::new(EventKind::OperationStarted, correlation_id).with_category(category)
    }

    pub fn completed(correlation_id: impl Into<String>) -> Self {
        Self::new(EventKind::OperationCompleted, correlation_id)
    }

    pub fn success(correlation_id: impl Into<String>) -> Self {
        Self::new(EventKind::TerminalSuccess, correlation_id)
    }

    pub fn failure(correlation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(EventKind::TerminalError, correlation_id).with_error(error)
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_kind_as_type() {
        let ev = EventRecord::started("ses_1", "bash");
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "operation-started");
        assert_eq!(v["category"], "bash");
        assert!(v.get("usage").is_none());
        assert!(v.get("payload").is_none());
    }

    #[test]
    fn terminal_kinds() {
        assert!(EventKind::TerminalSuccess.is_terminal());
        assert!(EventKind::TerminalError.is_terminal());
        assert!(!EventKind::OperationStarted.is_terminal());
        assert!(!EventKind::OperationCompleted.is_terminal());
    }
}
