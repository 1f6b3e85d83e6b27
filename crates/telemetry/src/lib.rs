//! Run tracing for switchboard.
//!
//! Provides span-based tracing of every scheduler action (model calls, tool
//! invocations, guardrail batches, hand-offs) and pluggable exporters. Tracing
//! is fire-and-forget: exporting never affects the run being traced.

pub mod exporter;
pub mod model;
pub mod tracer;

pub use exporter::{InMemoryExporter, LogExporter, TraceExporter};
pub use model::{Span, SpanKind, Trace};
pub use tracer::{SpanGuard, Tracer};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("span {0} exported before it ended")]
    UnfinishedSpan(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
