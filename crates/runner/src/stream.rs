//! Streamed runs.
//!
//! `RunStreamEvent` is what a streamed run yields to its consumer. The
//! scheduler runs in a spawned task holding the sending half of a bounded
//! channel; the consumer drains events and then awaits [`StreamedRun::completed`],
//! which is the only place the run's outcome (including a panic) surfaces.

use serde::{Deserialize, Serialize};
use switchboard_core::AgentInputItem;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;
use crate::scheduler::RunResult;

/// Name of a run-item event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunItemEventName {
    MessageCreated,
    ReasoningCreated,
    ToolCalled,
    ToolOutput,
    ToolApprovalRequested,
    HandoffRequested,
    HandoffOccurred,
}

impl RunItemEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreated => "message_created",
            Self::ReasoningCreated => "reasoning_created",
            Self::ToolCalled => "tool_called",
            Self::ToolOutput => "tool_output",
            Self::ToolApprovalRequested => "tool_approval_requested",
            Self::HandoffRequested => "handoff_requested",
            Self::HandoffOccurred => "handoff_occurred",
        }
    }
}

/// Events emitted by a streamed run, in generation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunStreamEvent {
    /// The model accepted a turn's request.
    ResponseStarted,

    /// Partial text token from the model.
    OutputTextDelta { delta: String },

    /// An item was added to the run.
    RunItem {
        name: RunItemEventName,
        item: AgentInputItem,
    },

    /// Control is now with this agent.
    AgentUpdated { agent: String },

    /// Provider payload passed through untouched.
    RawModelEvent { payload: serde_json::Value },
}

impl RunStreamEvent {
    pub(crate) fn item(name: RunItemEventName, item: &AgentInputItem) -> Self {
        Self::RunItem {
            name,
            item: item.clone(),
        }
    }

    /// Event name for logs and wire protocols.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ResponseStarted => "response_started",
            Self::OutputTextDelta { .. } => "output_text_delta",
            Self::RunItem { name, .. } => name.as_str(),
            Self::AgentUpdated { .. } => "agent_updated",
            Self::RawModelEvent { .. } => "raw_model_event",
        }
    }
}

/// Sending side used by the scheduler. Blocking runs use a disabled emitter.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventEmitter {
    tx: Option<mpsc::Sender<RunStreamEvent>>,
}

impl EventEmitter {
    pub(crate) fn new(tx: mpsc::Sender<RunStreamEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn disabled() -> Self {
        Self { tx: None }
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.tx.is_some()
    }

    /// Deliver an event. A consumer that went away is not an error.
    pub(crate) async fn emit(&self, event: RunStreamEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Handle to a run executing in the background.
pub struct StreamedRun {
    events: Option<mpsc::Receiver<RunStreamEvent>>,
    task: JoinHandle<Result<RunResult, RunError>>,
    cancel: CancellationToken,
}

impl StreamedRun {
    pub(crate) fn new(
        events: mpsc::Receiver<RunStreamEvent>,
        task: JoinHandle<Result<RunResult, RunError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events: Some(events),
            task,
            cancel,
        }
    }

    /// Next event, or `None` once the run has stopped producing events.
    pub async fn next_event(&mut self) -> Option<RunStreamEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take the events as a `Stream`. Returns `None` if already taken.
    pub fn event_stream(&mut self) -> Option<ReceiverStream<RunStreamEvent>> {
        self.events.take().map(ReceiverStream::new)
    }

    /// Ask the run to stop. In-flight model and tool calls are abandoned and
    /// the run completes with [`RunError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish.
    ///
    /// Undrained events are discarded so the run can't block on a full
    /// channel. A panicking run surfaces here as [`RunError::Internal`].
    pub async fn completed(mut self) -> Result<RunResult, RunError> {
        drop(self.events.take());
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                Err(RunError::Internal(format!("run task panicked: {message}")))
            }
            Err(e) => Err(RunError::Internal(format!("run task aborted: {e}"))),
        }
    }
}

impl std::fmt::Debug for StreamedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedRun")
            .field("events_taken", &self.events.is_none())
            .field("finished", &self.task.is_finished())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{ToolCall, ToolResult};

    #[test]
    fn run_item_serialization() {
        let event = RunStreamEvent::item(
            RunItemEventName::ToolCalled,
            &AgentInputItem::ToolCall(ToolCall::new("c1", "lookup", "{}")),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_item");
        assert_eq!(json["name"], "tool_called");
        assert_eq!(json["item"]["type"], "tool_call");
    }

    #[test]
    fn event_type_names() {
        assert_eq!(RunStreamEvent::ResponseStarted.event_type(), "response_started");
        assert_eq!(
            RunStreamEvent::item(
                RunItemEventName::ToolOutput,
                &AgentInputItem::ToolResult(ToolResult::success("c1", "ok"))
            )
            .event_type(),
            "tool_output"
        );
        assert_eq!(
            RunStreamEvent::AgentUpdated {
                agent: "triage".into()
            }
            .event_type(),
            "agent_updated"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"output_text_delta","delta":"hi"}"#;
        let event: RunStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            RunStreamEvent::OutputTextDelta { delta } => assert_eq!(delta, "hi"),
            _ => panic!("Wrong variant"),
        }
    }

    #[tokio::test]
    async fn disabled_emitter_is_silent() {
        let emitter = EventEmitter::disabled();
        assert!(!emitter.is_streaming());
        emitter.emit(RunStreamEvent::ResponseStarted).await;
    }

    #[tokio::test]
    async fn emitter_survives_dropped_consumer() {
        let (tx, rx) = mpsc::channel(1);
        let emitter = EventEmitter::new(tx);
        drop(rx);
        emitter.emit(RunStreamEvent::ResponseStarted).await;
    }

    #[tokio::test]
    async fn panicking_task_surfaces_through_completed() {
        let (_tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async {
            let outcome: Result<RunResult, RunError> = Err(RunError::StateFinalized);
            if outcome.is_err() {
                panic!("scheduler exploded");
            }
            outcome
        });
        let run = StreamedRun::new(rx, task, CancellationToken::new());
        let err = run.completed().await.unwrap_err();
        assert!(matches!(err, RunError::Internal(msg) if msg.contains("scheduler exploded")));
    }
}
