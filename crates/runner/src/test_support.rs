//! Test doubles for models, tools and guardrails.
//!
//! Used by this crate's tests, by integration tests, and by the CLI, which
//! replays scripted model responses through [`ScriptedModel`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use switchboard_core::{
    AgentInputItem, FinalOutput, GuardrailError, GuardrailOutput, InputGuardrail, Model,
    ModelError, ModelEventReceiver, ModelRequest, ModelResponse, ModelStreamEvent,
    OutputGuardrail, RunContext, Tool, ToolCall, ToolError, Usage,
};
use tokio::sync::{Notify, mpsc};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Models ────────────────────────────────────────────────────────────────

/// A model that returns a sequence of scripted responses.
///
/// Each call returns the next response in the queue; an exhausted script
/// answers with [`ModelError::NoResponse`].
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Script that may include failures.
    pub fn with_results(results: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(results.into()),
        }
    }

    pub fn push(&self, response: ModelResponse) {
        lock(&self.responses).push_back(Ok(response));
    }

    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }

    fn next(&self) -> Result<ModelResponse, ModelError> {
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::NoResponse("script exhausted".into())))
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_response(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.next()
    }

    /// Replays the next response as started, one delta per assistant
    /// message, then done. A scripted failure arrives mid-stream.
    async fn stream_response(&self, _request: ModelRequest) -> Result<ModelEventReceiver, ModelError> {
        let mut events = vec![Ok(ModelStreamEvent::ResponseStarted)];
        match self.next() {
            Ok(response) => {
                for item in &response.output {
                    if let AgentInputItem::AssistantMessage { content, .. } = item {
                        events.push(Ok(ModelStreamEvent::OutputTextDelta {
                            delta: content.clone(),
                        }));
                    }
                }
                events.push(Ok(ModelStreamEvent::ResponseDone { response }));
            }
            Err(e) => events.push(Err(e)),
        }

        let (tx, rx) = mpsc::channel(events.len());
        for event in events {
            let _ = tx.try_send(event);
        }
        Ok(rx)
    }
}

/// Records every request before delegating to an inner model.
pub struct TrackingModel {
    inner: Arc<dyn Model>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl TrackingModel {
    pub fn new(inner: Arc<dyn Model>) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Wrap a [`ScriptedModel`] over `responses`.
    pub fn scripted(responses: Vec<ModelResponse>) -> Self {
        Self::new(Arc::new(ScriptedModel::new(responses)))
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Model for TrackingModel {
    fn name(&self) -> &str {
        "tracking"
    }

    async fn get_response(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        lock(&self.requests).push(request.clone());
        self.inner.get_response(request).await
    }

    async fn stream_response(&self, request: ModelRequest) -> Result<ModelEventReceiver, ModelError> {
        lock(&self.requests).push(request.clone());
        self.inner.stream_response(request).await
    }
}

/// A text-only response.
pub fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        output: vec![AgentInputItem::assistant(text)],
        usage: Usage {
            requests: 1,
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        },
        response_id: None,
    }
}

/// A function call item with JSON arguments.
pub fn function_call(call_id: &str, name: &str, arguments: serde_json::Value) -> AgentInputItem {
    AgentInputItem::ToolCall(ToolCall::new(call_id, name, arguments.to_string()))
}

// ── Tools ─────────────────────────────────────────────────────────────────

/// Returns its `text` argument, or the raw arguments when there is none.
pub struct EchoTool {
    name: String,
    needs_approval: bool,
}

impl EchoTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needs_approval: false,
        }
    }

    pub fn needing_approval(mut self) -> Self {
        self.needs_approval = true;
        self
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes back the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    async fn needs_approval(&self, _arguments: &serde_json::Value, _context: &RunContext) -> bool {
        self.needs_approval
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        _context: &RunContext,
    ) -> Result<String, ToolError> {
        Ok(match arguments.get("text").and_then(|t| t.as_str()) {
            Some(text) => text.to_string(),
            None => arguments.to_string(),
        })
    }
}

/// Always fails.
pub struct FailingTool {
    name: String,
}

impl FailingTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Fails every invocation"
    }

    async fn invoke(
        &self,
        _arguments: serde_json::Value,
        _context: &RunContext,
    ) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: "simulated failure".into(),
        })
    }
}

/// Blocks every invocation until [`release`](Self::release) is called.
pub struct BlockingTool {
    name: String,
    started: Notify,
    released: Notify,
    invocations: AtomicUsize,
}

impl BlockingTool {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            started: Notify::new(),
            released: Notify::new(),
            invocations: AtomicUsize::new(0),
        })
    }

    /// Let one blocked (or the next) invocation finish.
    pub fn release(&self) {
        self.released.notify_one();
    }

    /// Wait until an invocation has started.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for BlockingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Waits for the test to release it"
    }

    async fn invoke(
        &self,
        _arguments: serde_json::Value,
        _context: &RunContext,
    ) -> Result<String, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.released.notified().await;
        Ok(format!("{} done", self.name))
    }
}

// ── Guardrails ────────────────────────────────────────────────────────────

/// Trips when any input message contains a keyword. Counts its runs.
pub struct KeywordGuardrail {
    name: String,
    keyword: String,
    calls: AtomicUsize,
}

impl KeywordGuardrail {
    pub fn new(name: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyword: keyword.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputGuardrail for KeywordGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        input: &[AgentInputItem],
        _context: &RunContext,
    ) -> Result<GuardrailOutput, GuardrailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hit = input
            .iter()
            .filter_map(|item| item.text())
            .any(|text| text.contains(&self.keyword));
        Ok(if hit {
            GuardrailOutput::tripwire(serde_json::json!({ "keyword": self.keyword }))
        } else {
            GuardrailOutput::pass()
        })
    }
}

/// Output guardrail with a fixed verdict. Counts its runs.
pub struct StaticOutputGuardrail {
    name: String,
    verdict: GuardrailOutput,
    calls: AtomicUsize,
}

impl StaticOutputGuardrail {
    pub fn passing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verdict: GuardrailOutput::pass(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn tripping(name: impl Into<String>, info: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            verdict: GuardrailOutput::tripwire(info),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputGuardrail for StaticOutputGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _output: &FinalOutput,
        _context: &RunContext,
    ) -> Result<GuardrailOutput, GuardrailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.clone())
    }
}
