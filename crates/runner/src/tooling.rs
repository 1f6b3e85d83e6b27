//! Tool & approval subsystem.
//!
//! Gates each call of a turn through its approval check, runs the runnable
//! ones concurrently and folds the results back in the order the calls were
//! made, whatever order they finish in.

use std::collections::BTreeMap;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use switchboard_config::ToolErrorPolicy;
use switchboard_core::{
    Agent, AgentInputItem, ApprovalDecision, ApprovalRequest, EventBus, LifecycleEvent, RunContext,
    ToolCall, ToolError, ToolResult,
};
use switchboard_telemetry::{Span, SpanKind, Tracer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RunError;
use crate::scheduler::publish;
use crate::stream::{EventEmitter, RunItemEventName, RunStreamEvent};

/// What happened to the calls of one turn.
#[derive(Debug, Default)]
pub(crate) struct DispatchOutcome {
    /// Results of the calls that ran, in call order.
    pub results: Vec<ToolResult>,
    /// Calls waiting for a decision. None of them ran.
    pub pending: Vec<ApprovalRequest>,
    /// Calls skipped because the caller rejected them.
    pub rejected: usize,
    /// Set when cancellation cut the batch short; `results` then holds only
    /// the calls that finished.
    pub cancelled: bool,
}

enum Gate {
    Run,
    Pending,
    Rejected,
}

pub(crate) struct ToolDispatcher<'a> {
    pub agent: &'a Agent,
    pub context: &'a RunContext,
    pub emitter: &'a EventEmitter,
    pub policy: ToolErrorPolicy,
    pub cancel: &'a CancellationToken,
    pub tracer: &'a Tracer,
    pub parent_span: &'a Span,
    pub hooks: &'a EventBus,
}

impl ToolDispatcher<'_> {
    pub(crate) async fn dispatch(
        &self,
        calls: &[ToolCall],
        decisions: &BTreeMap<String, ApprovalDecision>,
    ) -> Result<DispatchOutcome, RunError> {
        let mut outcome = DispatchOutcome::default();
        let mut runnable: Vec<&ToolCall> = Vec::new();

        // Approval checks run one at a time, in call order.
        for call in calls {
            match self.gate(call, decisions).await {
                Gate::Run => runnable.push(call),
                Gate::Pending => {
                    debug!(tool = %call.name, call_id = %call.call_id, "Tool call needs approval");
                    outcome.pending.push(ApprovalRequest::for_function(call.clone()));
                }
                Gate::Rejected => {
                    debug!(tool = %call.name, call_id = %call.call_id, "Tool call rejected");
                    outcome.rejected += 1;
                }
            }
        }

        for call in &runnable {
            publish(
                self.hooks,
                self.agent,
                LifecycleEvent::ToolStart {
                    agent: self.agent.name.clone(),
                    tool_name: call.name.clone(),
                    call_id: call.call_id.clone(),
                    timestamp: Utc::now(),
                },
            );
        }

        let mut arena: Vec<Option<ToolResult>> = vec![None; runnable.len()];
        let mut next_to_emit = 0;
        let mut in_flight: FuturesUnordered<_> = runnable
            .iter()
            .enumerate()
            .map(|(index, call)| async move { (index, self.invoke(call).await) })
            .collect();

        while !in_flight.is_empty() {
            let (index, result) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                Some(done) = in_flight.next() => done,
                else => break,
            };

            let call = runnable[index];
            let result = match result {
                Ok(output) => ToolResult::success(&call.call_id, output),
                Err(e) if self.policy == ToolErrorPolicy::Fatal => {
                    return Err(RunError::ToolInvocation {
                        tool_name: call.name.clone(),
                        source: e,
                        state: None,
                    });
                }
                Err(e) => {
                    warn!(tool = %call.name, call_id = %call.call_id, error = %e, "Tool execution failed");
                    ToolResult::error(&call.call_id, format!("Error: {e}"))
                }
            };

            publish(
                self.hooks,
                self.agent,
                LifecycleEvent::ToolEnd {
                    agent: self.agent.name.clone(),
                    tool_name: call.name.clone(),
                    call_id: call.call_id.clone(),
                    success: !result.is_error,
                    output: result.output.clone(),
                    timestamp: Utc::now(),
                },
            );
            arena[index] = Some(result);

            // Outputs go out in call order as soon as every earlier call is done.
            while let Some(Some(ready)) = arena.get(next_to_emit) {
                self.emitter
                    .emit(RunStreamEvent::item(
                        RunItemEventName::ToolOutput,
                        &AgentInputItem::ToolResult(ready.clone()),
                    ))
                    .await;
                next_to_emit += 1;
            }
        }
        drop(in_flight);

        outcome.results = arena.into_iter().flatten().collect();
        Ok(outcome)
    }

    async fn gate(&self, call: &ToolCall, decisions: &BTreeMap<String, ApprovalDecision>) -> Gate {
        match decisions.get(&call.call_id) {
            Some(ApprovalDecision::Approved) => return Gate::Run,
            Some(ApprovalDecision::Rejected) => return Gate::Rejected,
            None => {}
        }
        // Unknown tools and bad arguments fail at invocation instead.
        let Some(tool) = self.agent.tool(&call.name) else {
            return Gate::Run;
        };
        let Ok(arguments) = call.parsed_arguments() else {
            return Gate::Run;
        };
        if tool.needs_approval(&arguments, self.context).await {
            Gate::Pending
        } else {
            Gate::Run
        }
    }

    /// Run one call under its own span. A call dropped by cancellation
    /// still closes its span, as failed.
    async fn invoke(&self, call: &ToolCall) -> Result<String, ToolError> {
        let span = self.tracer.guard(
            self.tracer
                .start_span(SpanKind::ToolInvocation, &call.name, Some(self.parent_span))
                .with_metadata("call_id", serde_json::json!(call.call_id)),
        );

        let result = match self.agent.tool(&call.name) {
            None => Err(ToolError::NotFound(call.name.clone())),
            Some(tool) => match call.parsed_arguments() {
                Ok(arguments) => tool.invoke(arguments, self.context).await,
                Err(e) => Err(e),
            },
        };

        span.finish(result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BlockingTool, EchoTool, FailingTool};
    use std::sync::Arc;
    use switchboard_telemetry::InMemoryExporter;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        agent: Agent,
        context: RunContext,
        cancel: CancellationToken,
        tracer: Tracer,
        span: Span,
        hooks: EventBus,
    }

    impl Fixture {
        fn new(agent: Agent) -> Self {
            Self::with_tracer(agent, Tracer::disabled())
        }

        fn with_tracer(agent: Agent, tracer: Tracer) -> Self {
            let span = tracer.start_span(SpanKind::AgentRun, "test", None);
            Self {
                agent,
                context: RunContext::new(),
                cancel: CancellationToken::new(),
                tracer,
                span,
                hooks: EventBus::default(),
            }
        }

        fn dispatcher<'a>(
            &'a self,
            emitter: &'a EventEmitter,
            policy: ToolErrorPolicy,
        ) -> ToolDispatcher<'a> {
            ToolDispatcher {
                agent: &self.agent,
                context: &self.context,
                emitter,
                policy,
                cancel: &self.cancel,
                tracer: &self.tracer,
                parent_span: &self.span,
                hooks: &self.hooks,
            }
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, r#"{"text":"hi"}"#)
    }

    #[tokio::test]
    async fn results_follow_call_order_not_completion_order() {
        let slow = BlockingTool::new("slow");
        let fixture = Fixture::new(
            Agent::new("a")
                .with_tool(slow.clone())
                .with_tool(Arc::new(EchoTool::new("fast"))),
        );
        let emitter = EventEmitter::disabled();
        let dispatcher = fixture.dispatcher(&emitter, ToolErrorPolicy::Fold);

        let calls = vec![call("c1", "slow"), call("c2", "fast")];
        let releaser = {
            let slow = slow.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                slow.release();
            })
        };
        let outcome = dispatcher.dispatch(&calls, &BTreeMap::new()).await.unwrap();
        releaser.await.unwrap();

        let ids: Vec<_> = outcome.results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn approval_gate_holds_calls_back() {
        let fixture = Fixture::new(
            Agent::new("a")
                .with_tool(Arc::new(EchoTool::new("safe")))
                .with_tool(Arc::new(EchoTool::new("danger").needing_approval())),
        );
        let emitter = EventEmitter::disabled();
        let dispatcher = fixture.dispatcher(&emitter, ToolErrorPolicy::Fold);

        let outcome = dispatcher
            .dispatch(&[call("c1", "safe"), call("c2", "danger")], &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].id, "c2");

        let mut decisions = BTreeMap::new();
        decisions.insert("c2".to_string(), ApprovalDecision::Rejected);
        let outcome = dispatcher
            .dispatch(&[call("c2", "danger")], &decisions)
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.rejected, 1);
    }

    #[tokio::test]
    async fn failures_fold_or_abort_by_policy() {
        let fixture = Fixture::new(Agent::new("a").with_tool(Arc::new(FailingTool::new("flaky"))));
        let emitter = EventEmitter::disabled();

        let folded = fixture
            .dispatcher(&emitter, ToolErrorPolicy::Fold)
            .dispatch(&[call("c1", "flaky"), call("c2", "missing")], &BTreeMap::new())
            .await
            .unwrap();
        assert!(folded.results.iter().all(|r| r.is_error));
        assert!(folded.results[1].output.contains("Tool not found"));

        let err = fixture
            .dispatcher(&emitter, ToolErrorPolicy::Fatal)
            .dispatch(&[call("c1", "flaky")], &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::ToolInvocation { tool_name, .. } if tool_name == "flaky"));
    }

    #[tokio::test]
    async fn outputs_stream_in_call_order() {
        let slow = BlockingTool::new("slow");
        let fixture = Fixture::new(
            Agent::new("a")
                .with_tool(slow.clone())
                .with_tool(Arc::new(EchoTool::new("fast"))),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let emitter = EventEmitter::new(tx);
        let dispatcher = fixture.dispatcher(&emitter, ToolErrorPolicy::Fold);

        let calls = [call("c1", "slow"), call("c2", "fast")];
        let args = BTreeMap::new();
        let run = dispatcher.dispatch(&calls, &args);
        let observe = async {
            slow.started().await;
            slow.release();
            let mut ids = Vec::new();
            for _ in 0..2 {
                match rx.recv().await.unwrap() {
                    RunStreamEvent::RunItem {
                        name: RunItemEventName::ToolOutput,
                        item: AgentInputItem::ToolResult(result),
                    } => ids.push(result.call_id),
                    other => panic!("unexpected event {}", other.event_type()),
                }
            }
            ids
        };
        let (outcome, ids) = tokio::join!(run, observe);
        assert_eq!(outcome.unwrap().results.len(), 2);
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancellation_keeps_finished_results() {
        let slow = BlockingTool::new("slow");
        let fixture = Fixture::new(
            Agent::new("a")
                .with_tool(Arc::new(EchoTool::new("fast")))
                .with_tool(slow.clone()),
        );
        let emitter = EventEmitter::disabled();
        let dispatcher = fixture.dispatcher(&emitter, ToolErrorPolicy::Fold);

        let calls = [call("c1", "fast"), call("c2", "slow")];
        let cancel = fixture.cancel.clone();
        let canceller = async {
            slow.started().await;
            tokio::task::yield_now().await;
            cancel.cancel();
        };
        let args = BTreeMap::new();
        let (outcome, ()) = tokio::join!(dispatcher.dispatch(&calls, &args), canceller);
        let outcome = outcome.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].call_id, "c1");
    }

    #[tokio::test]
    async fn cancelled_calls_close_their_spans_as_failed() {
        let slow = BlockingTool::new("slow");
        let memory = Arc::new(InMemoryExporter::new());
        let fixture = Fixture::with_tracer(
            Agent::new("a")
                .with_tool(Arc::new(EchoTool::new("fast")))
                .with_tool(slow.clone()),
            Tracer::new().with_exporter(memory.clone()),
        );
        let emitter = EventEmitter::disabled();
        let dispatcher = fixture.dispatcher(&emitter, ToolErrorPolicy::Fold);

        let calls = [call("c1", "fast"), call("c2", "slow")];
        let cancel = fixture.cancel.clone();
        let canceller = async {
            slow.started().await;
            tokio::task::yield_now().await;
            cancel.cancel();
        };
        let args = BTreeMap::new();
        let (outcome, ()) = tokio::join!(dispatcher.dispatch(&calls, &args), canceller);
        assert!(outcome.unwrap().cancelled);

        let spans: Vec<_> = memory
            .spans()
            .into_iter()
            .filter(|s| s.kind == SpanKind::ToolInvocation)
            .collect();
        assert_eq!(spans.len(), 2);
        let status = |label: &str| {
            spans
                .iter()
                .find(|s| s.label == label)
                .and_then(|s| s.success)
        };
        assert_eq!(status("fast"), Some(true));
        assert_eq!(status("slow"), Some(false));
        assert_eq!(
            memory
                .started()
                .iter()
                .filter(|s| s.kind == SpanKind::ToolInvocation)
                .count(),
            2
        );
    }
}
