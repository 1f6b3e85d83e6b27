//! Fire-and-forget span production.
//!
//! The tracer hands out spans, tells every exporter when one opens and ships
//! it again once it finishes. Export failures are logged and swallowed;
//! callers never see them.

use std::sync::Arc;

use crate::exporter::TraceExporter;
use crate::model::{Span, SpanKind};

#[derive(Clone)]
pub struct Tracer {
    enabled: bool,
    exporters: Vec<Arc<dyn TraceExporter>>,
}

impl Tracer {
    /// An enabled tracer with no exporters.
    pub fn new() -> Self {
        Self {
            enabled: true,
            exporters: Vec::new(),
        }
    }

    /// A tracer that records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            exporters: Vec::new(),
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn TraceExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Open a span, as a root when `parent` is `None`.
    pub fn start_span(&self, kind: SpanKind, label: &str, parent: Option<&Span>) -> Span {
        let span = match parent {
            Some(parent) => Span::child_of(parent, kind, label),
            None => Span::new(kind, label),
        };
        if self.enabled {
            for exporter in &self.exporters {
                exporter.on_start(&span);
            }
        }
        span
    }

    /// Tie an open span to a scope. The span ends as failed if the guard is
    /// dropped before [`SpanGuard::finish`], e.g. when the owning future is
    /// cancelled.
    pub fn guard(&self, span: Span) -> SpanGuard<'_> {
        SpanGuard {
            tracer: self,
            span: Some(span),
        }
    }

    /// Close a span and export it.
    pub fn end_span(&self, mut span: Span, success: bool) {
        if !self.enabled {
            return;
        }
        span.end(success);
        for exporter in &self.exporters {
            if let Err(e) = exporter.export(&span) {
                tracing::warn!(
                    span_id = %span.id,
                    kind = %span.kind,
                    error = %e,
                    "Span export failed"
                );
            }
        }
    }
}

/// An open span that is always ended.
#[must_use = "dropping the guard ends the span as failed"]
pub struct SpanGuard<'a> {
    tracer: &'a Tracer,
    span: Option<Span>,
}

impl SpanGuard<'_> {
    pub fn finish(mut self, success: bool) {
        if let Some(span) = self.span.take() {
            self.tracer.end_span(span, success);
        }
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            self.tracer.end_span(span, false);
        }
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.enabled)
            .field("exporters", &self.exporters.len())
            .finish()
    }
}
