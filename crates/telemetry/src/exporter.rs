//! Span exporters.

use std::sync::RwLock;

use crate::TelemetryError;
use crate::model::{Span, Trace};

/// Receives spans as they open and once they finish.
///
/// Exporters are called inline; slow exporters should buffer internally.
pub trait TraceExporter: Send + Sync {
    /// A span was opened. Most exporters only care about finished spans.
    fn on_start(&self, _span: &Span) {}

    fn export(&self, span: &Span) -> Result<(), TelemetryError>;
}

/// Keeps every exported span in memory, grouped by trace.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    traces: RwLock<Vec<Trace>>,
    started: RwLock<Vec<Span>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All traces, oldest first.
    pub fn traces(&self) -> Vec<Trace> {
        self.traces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Every exported span across traces, in export order per trace.
    pub fn spans(&self) -> Vec<Span> {
        self.traces().into_iter().flat_map(|t| t.spans).collect()
    }

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces().into_iter().find(|t| t.id == trace_id)
    }

    /// Spans as they were opened, in start order.
    pub fn started(&self) -> Vec<Span> {
        self.started
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.traces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.started
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl TraceExporter for InMemoryExporter {
    fn on_start(&self, span: &Span) {
        self.started
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(span.clone());
    }

    fn export(&self, span: &Span) -> Result<(), TelemetryError> {
        if !span.is_finished() {
            return Err(TelemetryError::UnfinishedSpan(span.id.clone()));
        }
        let mut traces = self
            .traces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match traces.iter_mut().find(|t| t.id == span.trace_id) {
            Some(trace) => trace.add_span(span.clone()),
            None => {
                let mut trace = Trace::new(span.trace_id.clone());
                trace.add_span(span.clone());
                traces.push(trace);
            }
        }
        Ok(())
    }
}

/// Emits each finished span as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl TraceExporter for LogExporter {
    fn on_start(&self, span: &Span) {
        tracing::debug!(
            target: "switchboard::trace",
            trace_id = %span.trace_id,
            span_id = %span.id,
            kind = %span.kind,
            label = %span.label,
            "span started"
        );
    }

    fn export(&self, span: &Span) -> Result<(), TelemetryError> {
        let metadata = serde_json::to_string(&span.metadata)?;
        tracing::info!(
            target: "switchboard::trace",
            trace_id = %span.trace_id,
            span_id = %span.id,
            parent_id = span.parent_id.as_deref().unwrap_or("-"),
            kind = %span.kind,
            label = %span.label,
            duration_ms = span.duration_ms.unwrap_or(0),
            success = span.success.unwrap_or(false),
            metadata = %metadata,
            "span finished"
        );
        Ok(())
    }
}
