//! The turn scheduler.
//!
//! A run alternates model calls and tool dispatch until the current agent
//! produces a final output, a tool call needs approval, or the turn budget
//! runs out. Blocking and streamed runs share one loop; streaming only
//! changes how the model is called and whether events are emitted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use switchboard_config::{RunnerConfig, ToolErrorPolicy};
use switchboard_core::{
    Agent, AgentInputItem, ApprovalDecision, ApprovalKind, ApprovalRequest, ConversationMemory,
    EventBus, FinalOutput, GuardrailResult, HandoffCall, HandoffResult, InputGuardrail,
    LifecycleEvent, Model, ModelError, ModelRequest, ModelResponse, ModelStreamEvent,
    OutputGuardrail, RunContext, ToolCall, ToolUseBehavior, Usage,
};
use switchboard_telemetry::{LogExporter, Span, SpanKind, Tracer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RunError;
use crate::guardrails::{run_input_guardrails, run_output_guardrails};
use crate::history::compute_turn_input;
use crate::state::{ExecutionState, RunStatus};
use crate::stream::{EventEmitter, RunItemEventName, RunStreamEvent, StreamedRun};
use crate::tooling::{DispatchOutcome, ToolDispatcher};

/// Final message of a run whose pending tool calls were all rejected.
pub const NOT_APPROVED_MESSAGE: &str = "Tool execution was not approved.";

const MULTIPLE_HANDOFFS_MESSAGE: &str = "Multiple handoffs detected, ignoring this one.";

/// Publish on the runner's bus and, when the agent has one, on its own.
pub(crate) fn publish(bus: &EventBus, agent: &Agent, event: LifecycleEvent) {
    if let Some(hooks) = &agent.hooks {
        hooks.publish(event.clone());
    }
    bus.publish(event);
}

/// What a run starts from.
#[derive(Debug, Clone)]
pub enum RunInput {
    /// A fresh run over these items.
    Items(Vec<AgentInputItem>),
    /// Continue a previous run.
    State(ExecutionState),
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        RunInput::Items(vec![AgentInputItem::user(text)])
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        RunInput::Items(vec![AgentInputItem::user(text)])
    }
}

impl From<Vec<AgentInputItem>> for RunInput {
    fn from(items: Vec<AgentInputItem>) -> Self {
        RunInput::Items(items)
    }
}

impl From<ExecutionState> for RunInput {
    fn from(state: ExecutionState) -> Self {
        RunInput::State(state)
    }
}

/// Per-run overrides of the runner's defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_turns: Option<u32>,
    /// Memory mode for a fresh run. A resumed run must match its state.
    pub memory: Option<ConversationMemory>,
    /// Values merged into the run context.
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outcome of a run that completed or paused.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The state to persist or resume.
    pub state: ExecutionState,
    pub final_output: Option<FinalOutput>,
    /// Requests waiting for a decision when the run paused.
    pub interruptions: Vec<ApprovalRequest>,
    /// Items generated by this invocation.
    pub new_items: Vec<AgentInputItem>,
    /// One response per turn of the whole run.
    pub raw_responses: Vec<ModelResponse>,
    pub input_guardrail_results: Vec<GuardrailResult>,
    pub output_guardrail_results: Vec<GuardrailResult>,
    pub last_response_id: Option<String>,
    pub usage: Usage,
    pub last_agent: String,
}

impl RunResult {
    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.status() == RunStatus::Interrupted
    }
}

/// Runs agents.
#[derive(Clone)]
pub struct Runner {
    default_model: Option<Arc<dyn Model>>,
    max_turns: u32,
    tool_errors: ToolErrorPolicy,
    stream_buffer: usize,
    memory: ConversationMemory,
    input_guardrails: Vec<Arc<dyn InputGuardrail>>,
    output_guardrails: Vec<Arc<dyn OutputGuardrail>>,
    hooks: Arc<EventBus>,
    tracer: Tracer,
    workflow_name: String,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            default_model: None,
            max_turns: 10,
            tool_errors: ToolErrorPolicy::default(),
            stream_buffer: 128,
            memory: ConversationMemory::default(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            hooks: Arc::new(EventBus::default()),
            tracer: Tracer::disabled(),
            workflow_name: "Agent workflow".into(),
        }
    }

    /// Build a runner from validated configuration. Enabled tracing logs
    /// finished spans through `tracing`.
    pub fn from_config(config: &RunnerConfig) -> Result<Self, RunError> {
        config.validate()?;
        let tracer = if config.tracing.enabled {
            Tracer::new().with_exporter(Arc::new(LogExporter))
        } else {
            Tracer::disabled()
        };
        Ok(Self {
            max_turns: config.max_turns,
            tool_errors: config.tool_errors,
            stream_buffer: config.stream_buffer,
            memory: config.memory.to_conversation_memory()?,
            tracer,
            workflow_name: config.tracing.workflow_name.clone(),
            ..Self::new()
        })
    }

    /// Model used by agents that don't carry their own.
    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.default_model = Some(model);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_errors = policy;
        self
    }

    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = memory;
        self
    }

    /// Guardrail applied to every run, before the starting agent's own.
    pub fn with_input_guardrail(mut self, guardrail: Arc<dyn InputGuardrail>) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn OutputGuardrail>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = name.into();
        self
    }

    /// Lifecycle events of every run on this runner.
    pub fn hooks(&self) -> &Arc<EventBus> {
        &self.hooks
    }

    /// Run until the agent produces a final output or pauses for approval.
    pub async fn run(
        &self,
        starting_agent: &Arc<Agent>,
        input: impl Into<RunInput>,
        options: RunOptions,
    ) -> Result<RunResult, RunError> {
        self.execute(starting_agent, input.into(), options, EventEmitter::disabled())
            .await
    }

    /// Continue a paused (or completed) run.
    pub async fn resume(
        &self,
        starting_agent: &Arc<Agent>,
        state: ExecutionState,
        options: RunOptions,
    ) -> Result<RunResult, RunError> {
        self.run(starting_agent, RunInput::State(state), options).await
    }

    /// Run in a background task, streaming events as they happen.
    pub fn run_streamed(
        &self,
        starting_agent: &Arc<Agent>,
        input: impl Into<RunInput>,
        mut options: RunOptions,
    ) -> StreamedRun {
        let (tx, rx) = mpsc::channel(self.stream_buffer.max(1));
        let cancel = options
            .cancel
            .get_or_insert_with(CancellationToken::new)
            .clone();

        let runner = self.clone();
        let agent = starting_agent.clone();
        let input = input.into();
        let task = tokio::spawn(async move {
            runner
                .execute(&agent, input, options, EventEmitter::new(tx))
                .await
        });
        StreamedRun::new(rx, task, cancel)
    }

    async fn execute(
        &self,
        starting_agent: &Arc<Agent>,
        input: RunInput,
        options: RunOptions,
        emitter: EventEmitter,
    ) -> Result<RunResult, RunError> {
        let (state, resumed) = match input {
            RunInput::Items(items) => {
                let memory = options.memory.clone().unwrap_or_else(|| self.memory.clone());
                (ExecutionState::new(starting_agent, items, memory), false)
            }
            RunInput::State(state) => {
                check_resumable(starting_agent, &state, &options)?;
                (state, true)
            }
        };

        if state.status() == RunStatus::Completed {
            debug!(agent = %state.current_agent(), "State already completed, nothing to run");
            let seen = state.generated_items().len();
            return Ok(result_from(state, seen, Vec::new(), Vec::new()));
        }

        let agent = starting_agent
            .find(state.current_agent())
            .ok_or_else(|| RunError::ResumeStateMismatch(format!(
                "current agent '{}' is not reachable from '{}'",
                state.current_agent(),
                starting_agent.name
            )))?;

        let mut values = state.context().clone();
        if let Some(extra) = options.context {
            values.extend(extra);
        }

        let span = self
            .tracer
            .start_span(SpanKind::AgentRun, &self.workflow_name, None)
            .with_metadata("agent", serde_json::json!(starting_agent.name));
        info!(
            run_id = %span.trace_id,
            agent = %agent.name,
            resumed,
            streaming = emitter.is_streaming(),
            "Run started"
        );

        let mut execution = Execution {
            runner: self,
            starting_agent: starting_agent.clone(),
            agent,
            items_before: state.generated_items().len(),
            state,
            context: RunContext::from_values(values),
            emitter,
            cancel: options.cancel.unwrap_or_default(),
            span,
            max_turns: options.max_turns.unwrap_or(self.max_turns),
            resumed,
            input_guardrail_results: Vec::new(),
            output_guardrail_results: Vec::new(),
        };

        let outcome = execution.drive().await;
        execution.state.set_context(execution.context.snapshot());

        let Execution {
            state,
            span,
            items_before,
            input_guardrail_results,
            output_guardrail_results,
            ..
        } = execution;
        self.tracer.end_span(span, outcome.is_ok());

        match outcome {
            Ok(()) => {
                info!(
                    agent = %state.current_agent(),
                    status = ?state.status(),
                    turns = state.turn_count(),
                    "Run finished"
                );
                Ok(result_from(
                    state,
                    items_before,
                    input_guardrail_results,
                    output_guardrail_results,
                ))
            }
            Err(e) => {
                warn!(agent = %state.current_agent(), error = %e, "Run failed");
                Err(e)
            }
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("default_model", &self.default_model.as_ref().map(|m| m.name().to_string()))
            .field("max_turns", &self.max_turns)
            .field("tool_errors", &self.tool_errors)
            .field("memory", &self.memory)
            .field("tracer", &self.tracer)
            .finish()
    }
}

fn check_resumable(
    starting_agent: &Arc<Agent>,
    state: &ExecutionState,
    options: &RunOptions,
) -> Result<(), RunError> {
    state.verify_agent(starting_agent)?;
    if let Some(memory) = &options.memory
        && memory != state.memory()
    {
        return Err(RunError::ResumeStateMismatch(
            "conversation memory differs from the one the state was created with".into(),
        ));
    }
    match state.status() {
        RunStatus::Failed => Err(RunError::StateFinalized),
        RunStatus::Interrupted => {
            let pending = state.unresolved();
            if pending.is_empty() {
                Ok(())
            } else {
                Err(RunError::ApprovalsUnresolved { pending })
            }
        }
        RunStatus::Running | RunStatus::Completed => Ok(()),
    }
}

fn result_from(
    state: ExecutionState,
    items_before: usize,
    input_guardrail_results: Vec<GuardrailResult>,
    output_guardrail_results: Vec<GuardrailResult>,
) -> RunResult {
    RunResult {
        final_output: state.final_output().cloned(),
        interruptions: state.pending_interruptions().to_vec(),
        new_items: state
            .generated_items()
            .get(items_before..)
            .unwrap_or(&[])
            .to_vec(),
        raw_responses: state.model_responses().to_vec(),
        input_guardrail_results,
        output_guardrail_results,
        last_response_id: state.last_response_id().map(str::to_string),
        usage: *state.usage(),
        last_agent: state.current_agent().to_string(),
        state,
    }
}

enum NextStep {
    RunAgain,
    Handoff(HandoffCall),
    Final(FinalOutput),
    Interrupted,
}

/// One invocation of the scheduler over a state.
struct Execution<'r> {
    runner: &'r Runner,
    starting_agent: Arc<Agent>,
    agent: Arc<Agent>,
    state: ExecutionState,
    items_before: usize,
    context: RunContext,
    emitter: EventEmitter,
    cancel: CancellationToken,
    span: Span,
    max_turns: u32,
    resumed: bool,
    input_guardrail_results: Vec<GuardrailResult>,
    output_guardrail_results: Vec<GuardrailResult>,
}

impl Execution<'_> {
    async fn drive(&mut self) -> Result<(), RunError> {
        self.emitter
            .emit(RunStreamEvent::AgentUpdated {
                agent: self.agent.name.clone(),
            })
            .await;
        if !self.resumed {
            publish(
                &self.runner.hooks,
                &self.agent,
                LifecycleEvent::AgentStart {
                    agent: self.agent.name.clone(),
                    timestamp: Utc::now(),
                },
            );
        }

        if !self.state.input_guardrails_done() {
            self.check_input().await?;
        }

        let mut step = if self.state.status() == RunStatus::Interrupted {
            self.resolve_interruptions().await?
        } else {
            NextStep::RunAgain
        };

        loop {
            match step {
                NextStep::Interrupted => return Ok(()),
                NextStep::Final(output) => return self.finish(output).await,
                NextStep::Handoff(call) => self.handoff(call).await?,
                NextStep::RunAgain => {}
            }

            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }
            if self.state.turn_count() >= self.max_turns {
                warn!(agent = %self.agent.name, max_turns = self.max_turns, "Turn budget exhausted");
                self.state.set_context(self.context.snapshot());
                return Err(RunError::MaxTurnsExceeded {
                    max_turns: self.max_turns,
                    state: Box::new(self.state.clone()),
                });
            }

            step = self.run_turn().await?;
        }
    }

    async fn check_input(&mut self) -> Result<(), RunError> {
        let guardrails: Vec<Arc<dyn InputGuardrail>> = self
            .runner
            .input_guardrails
            .iter()
            .chain(&self.starting_agent.input_guardrails)
            .cloned()
            .collect();
        if !guardrails.is_empty() {
            let span = self.runner.tracer.start_span(
                SpanKind::Guardrail,
                "input_guardrails",
                Some(&self.span),
            );
            let results =
                run_input_guardrails(&guardrails, self.state.original_input(), &self.context).await;
            self.runner.tracer.end_span(span, results.is_ok());
            if results.is_err() {
                self.state.fail("input guardrail tripwire triggered");
            }
            self.input_guardrail_results = results?;
        }
        self.state.set_input_guardrails_done();
        Ok(())
    }

    /// Fold the caller's decisions back into the run.
    async fn resolve_interruptions(&mut self) -> Result<NextStep, RunError> {
        let (pending, handoff) = self.state.take_interruptions();
        let decisions = self.state.approval_decisions().clone();
        let is_approved = |request: &ApprovalRequest| {
            decisions.get(&request.id) == Some(&ApprovalDecision::Approved)
        };
        let any_approved = pending.iter().any(is_approved);
        debug!(
            agent = %self.agent.name,
            pending = pending.len(),
            any_approved,
            "Resuming interrupted run"
        );

        let calls: Vec<ToolCall> = pending
            .iter()
            .filter(|r| r.kind == ApprovalKind::Function)
            .map(|r| r.tool_call.clone())
            .collect();
        let outcome = self.dispatch(&calls, &decisions).await?;
        let stop_output = outcome.results.first().map(|r| r.output.clone());

        // Approved items are folded in request order; rejected ones leave no trace.
        let mut results = outcome.results.into_iter().peekable();
        for request in pending.iter().filter(|r| is_approved(r)) {
            match request.kind {
                ApprovalKind::Function => {
                    if let Some(result) = results.next_if(|r| r.call_id == request.tool_call.call_id)
                    {
                        self.state.push_item(AgentInputItem::ToolResult(result));
                    }
                }
                ApprovalKind::Hosted => {
                    self.state.push_item(AgentInputItem::ApprovalResponse {
                        request_id: request.id.clone(),
                        approved: true,
                    });
                }
            }
        }
        if outcome.cancelled {
            return Err(self.cancelled());
        }

        if let Some(call) = handoff {
            return Ok(NextStep::Handoff(call));
        }
        if !any_approved {
            info!(agent = %self.agent.name, "No tool call approved, finishing run");
            self.push_emit(
                AgentInputItem::AssistantMessage {
                    content: NOT_APPROVED_MESSAGE.into(),
                    agent: Some(self.agent.name.clone()),
                },
                RunItemEventName::MessageCreated,
            )
            .await;
            return Ok(NextStep::Final(FinalOutput::Text(NOT_APPROVED_MESSAGE.into())));
        }
        if self.agent.tool_use_behavior == ToolUseBehavior::StopOnFirstTool
            && let Some(output) = stop_output
        {
            return Ok(NextStep::Final(FinalOutput::Text(output)));
        }
        Ok(NextStep::RunAgain)
    }

    async fn run_turn(&mut self) -> Result<NextStep, RunError> {
        let agent = self.agent.clone();
        let model = agent
            .model
            .clone()
            .or_else(|| self.runner.default_model.clone())
            .ok_or_else(|| {
                RunError::Config(format!("no model configured for agent '{}'", agent.name))
            })?;

        let turn = compute_turn_input(
            self.state.memory(),
            self.state.send_progress(),
            self.state.original_input(),
            self.state.generated_items(),
            self.state.last_response_id(),
        );
        let request = ModelRequest {
            system_instructions: agent.instructions.clone(),
            input: turn.input,
            tools: agent.tool_definitions(),
            handoffs: agent.handoff_definitions(),
            model_settings: agent.model_settings.clone(),
            output_schema: agent.output_type.schema().cloned(),
            conversation_id: turn.conversation_id,
            previous_response_id: turn.previous_response_id,
        };
        let turn_number = self.state.turn_count() + 1;
        debug!(
            agent = %agent.name,
            turn = turn_number,
            items = request.input.len(),
            "Calling model"
        );

        let span = self
            .runner
            .tracer
            .start_span(SpanKind::ModelCall, model.name(), Some(&self.span))
            .with_metadata("agent", serde_json::json!(agent.name))
            .with_metadata("turn", serde_json::json!(turn_number));
        let cancel = self.cancel.clone();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = self.call_model(model.as_ref(), request) => Some(response),
        };
        let response = match response {
            None => {
                self.runner.tracer.end_span(span, false);
                return Err(self.cancelled());
            }
            Some(Err(e)) => {
                self.runner.tracer.end_span(span, false);
                self.state.fail(e.to_string());
                return Err(e.into());
            }
            Some(Ok(response)) => {
                self.runner.tracer.end_span(span, true);
                response
            }
        };
        self.state.record_response(&response);

        let mut calls: Vec<ToolCall> = Vec::new();
        let mut hosted: Vec<ApprovalRequest> = Vec::new();
        let mut handoff: Option<HandoffCall> = None;
        let mut ignored_handoffs: Vec<HandoffResult> = Vec::new();
        let mut final_text: Option<String> = None;

        for item in response.output {
            match item {
                AgentInputItem::AssistantMessage { content, .. } => {
                    final_text = Some(content.clone());
                    self.push_emit(
                        AgentInputItem::AssistantMessage {
                            content,
                            agent: Some(agent.name.clone()),
                        },
                        RunItemEventName::MessageCreated,
                    )
                    .await;
                }
                AgentInputItem::Reasoning { .. } => {
                    self.push_emit(item, RunItemEventName::ReasoningCreated).await;
                }
                AgentInputItem::ToolCall(call) => match agent.handoff(&call.name) {
                    Some(target) => {
                        let request = HandoffCall {
                            call_id: call.call_id,
                            tool_name: call.name,
                            target: target.agent.name.clone(),
                            arguments: call.arguments,
                        };
                        if handoff.is_none() {
                            handoff = Some(request.clone());
                            self.push_emit(
                                AgentInputItem::HandoffCall(request),
                                RunItemEventName::HandoffRequested,
                            )
                            .await;
                        } else {
                            ignored_handoffs.push(HandoffResult {
                                call_id: request.call_id.clone(),
                                target: request.target.clone(),
                                output: MULTIPLE_HANDOFFS_MESSAGE.into(),
                            });
                            self.state.push_item(AgentInputItem::HandoffCall(request));
                        }
                    }
                    None => {
                        calls.push(call.clone());
                        self.push_emit(
                            AgentInputItem::ToolCall(call),
                            RunItemEventName::ToolCalled,
                        )
                        .await;
                    }
                },
                AgentInputItem::ApprovalRequest(request) => hosted.push(request),
                other => self.state.push_item(other),
            }
        }
        // The server holds the request and everything the model just said.
        self.state.mark_sent();

        for result in ignored_handoffs {
            self.state.push_item(AgentInputItem::HandoffResult(result));
        }

        let outcome = self.dispatch(&calls, &BTreeMap::new()).await?;
        let stop_output = outcome.results.first().map(|r| r.output.clone());
        for result in outcome.results {
            self.state.push_item(AgentInputItem::ToolResult(result));
        }
        if outcome.cancelled {
            return Err(self.cancelled());
        }

        let mut pending = outcome.pending;
        pending.extend(hosted);
        if !pending.is_empty() {
            for request in &pending {
                self.push_emit(
                    AgentInputItem::ApprovalRequest(request.clone()),
                    RunItemEventName::ToolApprovalRequested,
                )
                .await;
            }
            info!(
                agent = %agent.name,
                turn = turn_number,
                pending = pending.len(),
                "Run paused for approval"
            );
            self.state.interrupt(pending, handoff);
            return Ok(NextStep::Interrupted);
        }

        if let Some(call) = handoff {
            return Ok(NextStep::Handoff(call));
        }

        if !calls.is_empty() {
            if agent.tool_use_behavior == ToolUseBehavior::StopOnFirstTool
                && let Some(output) = stop_output
            {
                return Ok(NextStep::Final(FinalOutput::Text(output)));
            }
            return Ok(NextStep::RunAgain);
        }

        match final_text {
            Some(text) => match agent.output_type.parse_final(&text) {
                Ok(output) => Ok(NextStep::Final(output)),
                Err(reason) => {
                    self.state.fail(reason.clone());
                    Err(RunError::ModelBehavior(reason))
                }
            },
            None => Ok(NextStep::RunAgain),
        }
    }

    async fn call_model(
        &self,
        model: &dyn Model,
        request: ModelRequest,
    ) -> Result<ModelResponse, ModelError> {
        if !self.emitter.is_streaming() {
            return model.get_response(request).await;
        }

        let mut events = model.stream_response(request).await?;
        while let Some(event) = events.recv().await {
            match event? {
                ModelStreamEvent::ResponseStarted => {
                    self.emitter.emit(RunStreamEvent::ResponseStarted).await;
                }
                ModelStreamEvent::OutputTextDelta { delta } => {
                    self.emitter
                        .emit(RunStreamEvent::OutputTextDelta { delta })
                        .await;
                }
                ModelStreamEvent::Raw { payload } => {
                    self.emitter
                        .emit(RunStreamEvent::RawModelEvent { payload })
                        .await;
                }
                ModelStreamEvent::ResponseDone { response } => return Ok(response),
            }
        }
        Err(ModelError::StreamInterrupted(
            "stream ended before the response completed".into(),
        ))
    }

    /// Run a batch of calls. A fatal tool failure fails the state and
    /// hands it back with the error.
    async fn dispatch(
        &mut self,
        calls: &[ToolCall],
        decisions: &BTreeMap<String, ApprovalDecision>,
    ) -> Result<DispatchOutcome, RunError> {
        if calls.is_empty() {
            return Ok(DispatchOutcome::default());
        }
        let outcome = ToolDispatcher {
            agent: &self.agent,
            context: &self.context,
            emitter: &self.emitter,
            policy: self.runner.tool_errors,
            cancel: &self.cancel,
            tracer: &self.runner.tracer,
            parent_span: &self.span,
            hooks: &self.runner.hooks,
        }
        .dispatch(calls, decisions)
        .await;

        match outcome {
            Err(RunError::ToolInvocation {
                tool_name, source, ..
            }) => {
                self.state.set_context(self.context.snapshot());
                self.state.fail(format!("tool '{tool_name}' failed: {source}"));
                Err(RunError::ToolInvocation {
                    tool_name,
                    source,
                    state: Some(Box::new(self.state.clone())),
                })
            }
            other => other,
        }
    }

    async fn handoff(&mut self, call: HandoffCall) -> Result<(), RunError> {
        let from = self.agent.clone();
        let Some(target) = from.handoff(&call.tool_name).map(|h| h.agent.clone()) else {
            let reason = format!(
                "agent '{}' has no hand-off named '{}'",
                from.name, call.tool_name
            );
            self.state.fail(reason.clone());
            return Err(RunError::ModelBehavior(reason));
        };

        let span = self.runner.tracer.start_span(
            SpanKind::Handoff,
            &format!("{} -> {}", from.name, target.name),
            Some(&self.span),
        );
        self.push_emit(
            AgentInputItem::HandoffResult(HandoffResult {
                call_id: call.call_id,
                target: target.name.clone(),
                output: serde_json::json!({ "assistant": target.name }).to_string(),
            }),
            RunItemEventName::HandoffOccurred,
        )
        .await;
        publish(
            &self.runner.hooks,
            &from,
            LifecycleEvent::Handoff {
                from: from.name.clone(),
                to: target.name.clone(),
                timestamp: Utc::now(),
            },
        );

        info!(from = %from.name, to = %target.name, "Hand-off");
        self.state.set_current_agent(&target.name);
        self.agent = target;
        self.emitter
            .emit(RunStreamEvent::AgentUpdated {
                agent: self.agent.name.clone(),
            })
            .await;
        publish(
            &self.runner.hooks,
            &self.agent,
            LifecycleEvent::AgentStart {
                agent: self.agent.name.clone(),
                timestamp: Utc::now(),
            },
        );
        self.runner.tracer.end_span(span, true);
        Ok(())
    }

    async fn finish(&mut self, output: FinalOutput) -> Result<(), RunError> {
        let guardrails: Vec<Arc<dyn OutputGuardrail>> = self
            .runner
            .output_guardrails
            .iter()
            .chain(&self.agent.output_guardrails)
            .cloned()
            .collect();
        if !guardrails.is_empty() {
            let span = self.runner.tracer.start_span(
                SpanKind::Guardrail,
                "output_guardrails",
                Some(&self.span),
            );
            let results = run_output_guardrails(&guardrails, &output, &self.context).await;
            self.runner.tracer.end_span(span, results.is_ok());
            if results.is_err() {
                self.state.fail("output guardrail tripwire triggered");
            }
            self.output_guardrail_results = results?;
        }

        self.state.complete(output.clone());
        publish(
            &self.runner.hooks,
            &self.agent,
            LifecycleEvent::AgentEnd {
                agent: self.agent.name.clone(),
                output: output.to_string(),
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    async fn push_emit(&mut self, item: AgentInputItem, name: RunItemEventName) {
        self.emitter.emit(RunStreamEvent::item(name, &item)).await;
        self.state.push_item(item);
    }

    fn cancelled(&mut self) -> RunError {
        warn!(agent = %self.agent.name, turn = self.state.turn_count(), "Run cancelled");
        self.state.set_context(self.context.snapshot());
        self.state.fail("cancelled");
        RunError::Cancelled {
            state: Box::new(self.state.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EchoTool, ScriptedModel, TrackingModel, function_call, text_response};
    use switchboard_core::Handoff;

    fn runner(responses: Vec<ModelResponse>) -> (Runner, Arc<TrackingModel>) {
        let model = Arc::new(TrackingModel::scripted(responses));
        (Runner::new().with_model(model.clone()), model)
    }

    #[tokio::test]
    async fn text_reply_completes_in_one_turn() {
        let (runner, model) = runner(vec![text_response("hello")]);
        let agent = Arc::new(Agent::new("assistant").with_instructions("Be brief."));

        let result = runner.run(&agent, "hi", RunOptions::default()).await.unwrap();

        assert_eq!(result.status(), RunStatus::Completed);
        assert_eq!(result.final_output, Some(FinalOutput::Text("hello".into())));
        assert_eq!(result.raw_responses.len(), 1);
        assert_eq!(result.usage.total_tokens, 15);
        assert_eq!(model.call_count(), 1);
        let request = &model.requests()[0];
        assert_eq!(request.system_instructions.as_deref(), Some("Be brief."));
        assert_eq!(request.input, vec![AgentInputItem::user("hi")]);
    }

    #[tokio::test]
    async fn tool_results_feed_the_next_turn() {
        let (runner, model) = runner(vec![
            ModelResponse::new(vec![function_call("c1", "echo", serde_json::json!({"text": "pong"}))]),
            text_response("done"),
        ]);
        let agent = Arc::new(Agent::new("a").with_tool(Arc::new(EchoTool::new("echo"))));

        let result = runner.run(&agent, "ping", RunOptions::default()).await.unwrap();

        assert_eq!(result.state.turn_count(), 2);
        let second = &model.requests()[1];
        assert_eq!(second.input.len(), 3);
        assert!(matches!(
            &second.input[2],
            AgentInputItem::ToolResult(r) if r.output == "pong" && !r.is_error
        ));
    }

    #[tokio::test]
    async fn stop_on_first_tool_uses_its_output() {
        let (runner, model) = runner(vec![ModelResponse::new(vec![function_call(
            "c1",
            "echo",
            serde_json::json!({"text": "42"}),
        )])]);
        let agent = Arc::new(
            Agent::new("a")
                .with_tool(Arc::new(EchoTool::new("echo")))
                .with_tool_use_behavior(ToolUseBehavior::StopOnFirstTool),
        );

        let result = runner.run(&agent, "q", RunOptions::default()).await.unwrap();
        assert_eq!(result.final_output, Some(FinalOutput::Text("42".into())));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_model_is_a_config_error() {
        let agent = Arc::new(Agent::new("a"));
        let err = Runner::new()
            .run(&agent, "hi", RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Config(msg) if msg.contains("'a'")));
    }

    #[tokio::test]
    async fn agent_model_overrides_the_default() {
        let (runner, default_model) = runner(vec![]);
        let own = Arc::new(ScriptedModel::new(vec![text_response("mine")]));
        let agent = Arc::new(Agent::new("a").with_model(own));

        let result = runner.run(&agent, "hi", RunOptions::default()).await.unwrap();
        assert_eq!(result.final_output, Some(FinalOutput::Text("mine".into())));
        assert_eq!(default_model.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_structured_output_is_a_model_behavior_error() {
        let (runner, _) = runner(vec![text_response("not json")]);
        let agent = Arc::new(Agent::new("a").with_output_type(switchboard_core::OutputType::Json {
            schema: serde_json::json!({"type": "object"}),
        }));
        let err = runner.run(&agent, "hi", RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, RunError::ModelBehavior(_)));
    }

    #[tokio::test]
    async fn second_handoff_in_a_response_is_ignored() {
        let billing = Arc::new(Agent::new("billing"));
        let support = Arc::new(Agent::new("support"));
        let triage = Arc::new(
            Agent::new("triage")
                .with_handoff(Handoff::to(billing))
                .with_handoff(Handoff::to(support)),
        );
        let (runner, _) = runner(vec![
            ModelResponse::new(vec![
                function_call("h1", "transfer_to_billing", serde_json::json!({})),
                function_call("h2", "transfer_to_support", serde_json::json!({})),
            ]),
            text_response("billing here"),
        ]);

        let result = runner.run(&triage, "refund", RunOptions::default()).await.unwrap();

        assert_eq!(result.last_agent, "billing");
        let ignored = result.new_items.iter().find_map(|item| match item {
            AgentInputItem::HandoffResult(r) if r.call_id == "h2" => Some(r.output.clone()),
            _ => None,
        });
        assert_eq!(ignored.as_deref(), Some(MULTIPLE_HANDOFFS_MESSAGE));
    }

    #[tokio::test]
    async fn options_context_reaches_the_state() {
        let (runner, _) = runner(vec![text_response("ok")]);
        let agent = Arc::new(Agent::new("a"));
        let result = runner
            .run(
                &agent,
                "hi",
                RunOptions::default().with_context("user_id", serde_json::json!(7)),
            )
            .await
            .unwrap();
        assert_eq!(result.state.context().get("user_id"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn run_input_conversions() {
        assert!(matches!(RunInput::from("hi"), RunInput::Items(items) if items.len() == 1));
        assert!(matches!(
            RunInput::from(vec![AgentInputItem::user("a"), AgentInputItem::user("b")]),
            RunInput::Items(items) if items.len() == 2
        ));
    }

    #[test]
    fn from_config_applies_settings() {
        let mut config = RunnerConfig::default();
        config.max_turns = 3;
        config.tracing.enabled = false;
        let runner = Runner::from_config(&config).unwrap();
        assert_eq!(runner.max_turns, 3);
        assert!(!runner.tracer.is_enabled());

        config.max_turns = 0;
        assert!(matches!(Runner::from_config(&config), Err(RunError::Config(_))));
    }
}
