//! Data model for run traces and spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A whole run, from first turn to completion or pause.
    AgentRun,
    /// One model call.
    ModelCall,
    /// One tool invocation.
    ToolInvocation,
    /// A batch of input or output guardrails.
    Guardrail,
    /// Control moving between agents.
    Handoff,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentRun => write!(f, "agent_run"),
            Self::ModelCall => write!(f, "model_call"),
            Self::ToolInvocation => write!(f, "tool_invocation"),
            Self::Guardrail => write!(f, "guardrail"),
            Self::Handoff => write!(f, "handoff"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier.
    pub id: String,
    /// Parent span id (None for root spans).
    pub parent_id: Option<String>,
    /// Trace this span belongs to; shared by every span of a run.
    pub trace_id: String,
    /// What kind of work this represents.
    pub kind: SpanKind,
    /// Human-readable label (e.g. tool name, agent name).
    pub label: String,
    /// When the span started.
    pub started_at: DateTime<Utc>,
    /// When the span ended (None if still running).
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds (computed on end).
    pub duration_ms: Option<u64>,
    /// Whether the operation succeeded.
    pub success: Option<bool>,
    /// Arbitrary metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    /// Create a root span, opening a new trace.
    pub fn new(kind: SpanKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            trace_id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            success: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a span nested under `parent`, in the parent's trace.
    pub fn child_of(parent: &Span, kind: SpanKind, label: impl Into<String>) -> Self {
        let mut span = Self::new(kind, label);
        span.parent_id = Some(parent.id.clone());
        span.trace_id = parent.trace_id.clone();
        span
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mark the span as ended with the given success status.
    pub fn end(&mut self, success: bool) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some(
            now.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.success = Some(success);
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All spans recorded for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Trace id shared by the spans.
    pub id: String,
    /// Label of the root span, when it has been exported.
    pub workflow_name: Option<String>,
    /// Spans in export order.
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow_name: None,
            spans: Vec::new(),
        }
    }

    /// Add a span to this trace.
    pub fn add_span(&mut self, span: Span) {
        if span.parent_id.is_none() {
            self.workflow_name = Some(span.label.clone());
        }
        self.spans.push(span);
    }

    /// Number of spans of one kind.
    pub fn count(&self, kind: SpanKind) -> usize {
        self.spans.iter().filter(|s| s.kind == kind).count()
    }

    /// The root span, if exported.
    pub fn root(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.parent_id.is_none())
    }

    /// Total duration of the root span in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.root().and_then(|s| s.duration_ms).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_lifecycle() {
        let mut span = Span::new(SpanKind::ModelCall, "triage");
        assert!(!span.is_finished());
        span.end(true);
        assert!(span.is_finished());
        assert_eq!(span.success, Some(true));
        assert!(span.duration_ms.is_some());
    }

    #[test]
    fn child_spans_share_the_trace() {
        let root = Span::new(SpanKind::AgentRun, "workflow");
        let child = Span::child_of(&root, SpanKind::ToolInvocation, "lookup")
            .with_metadata("call_id", serde_json::json!("c1"));
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(child.metadata["call_id"], "c1");
    }

    #[test]
    fn trace_counts_kinds_and_finds_root() {
        let mut root = Span::new(SpanKind::AgentRun, "workflow");
        let mut trace = Trace::new(root.trace_id.clone());
        trace.add_span(Span::child_of(&root, SpanKind::ModelCall, "m"));
        trace.add_span(Span::child_of(&root, SpanKind::ModelCall, "m"));
        root.end(true);
        trace.add_span(root);

        assert_eq!(trace.count(SpanKind::ModelCall), 2);
        assert_eq!(trace.workflow_name.as_deref(), Some("workflow"));
        assert!(trace.root().is_some());
    }

    #[test]
    fn span_kind_display() {
        assert_eq!(SpanKind::ToolInvocation.to_string(), "tool_invocation");
        assert_eq!(SpanKind::AgentRun.to_string(), "agent_run");
    }
}
