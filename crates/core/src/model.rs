//! Model trait — the abstraction over language-model backends.
//!
//! A Model knows how to turn a generic [`ModelRequest`] into a provider call
//! and hand back a [`ModelResponse`], either in one piece or as a stream of
//! [`ModelStreamEvent`]s. Wire formats are the implementation's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ModelError;
use crate::item::AgentInputItem;

/// Sampling and behavior knobs forwarded untouched to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Anything provider specific.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A hand-off target advertised to the model as a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffDefinition {
    pub tool_name: String,
    pub description: String,
    pub target: String,
}

/// Everything a backend needs for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,

    /// Items to send this turn (full history or a suffix, depending on the
    /// conversation memory mode).
    pub input: Vec<AgentInputItem>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handoffs: Vec<HandoffDefinition>,

    #[serde(default)]
    pub model_settings: ModelSettings,

    /// JSON schema of the expected final output, for structured agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub requests: u32,
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate another usage record into this one, saturating at
    /// `u32::MAX`.
    pub fn add(&mut self, other: &Usage) {
        self.requests = self.requests.saturating_add(other.requests);
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// A complete response from a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub output: Vec<AgentInputItem>,

    #[serde(default)]
    pub usage: Usage,

    /// Opaque id used to chain turns when the server keeps the history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl ModelResponse {
    pub fn new(output: Vec<AgentInputItem>) -> Self {
        Self {
            output,
            usage: Usage::default(),
            response_id: None,
        }
    }

    pub fn with_response_id(mut self, id: impl Into<String>) -> Self {
        self.response_id = Some(id.into());
        self
    }
}

/// One event from a streamed model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelStreamEvent {
    /// The backend accepted the request.
    ResponseStarted,

    /// A partial text token.
    OutputTextDelta { delta: String },

    /// The finished response. Must be the last event of a successful stream.
    ResponseDone { response: ModelResponse },

    /// Provider payload passed through to stream consumers.
    Raw { payload: serde_json::Value },
}

/// Receiving half of a streamed model response.
pub type ModelEventReceiver = mpsc::Receiver<Result<ModelStreamEvent, ModelError>>;

/// The core Model trait.
///
/// The runner calls `get_response()` for blocking runs and `stream_response()`
/// for streamed runs without knowing which backend sits behind it.
#[async_trait]
pub trait Model: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn get_response(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Send a request and get a stream of response events.
    ///
    /// Default implementation calls `get_response()` and replays the result
    /// as a started/done pair.
    async fn stream_response(&self, request: ModelRequest) -> Result<ModelEventReceiver, ModelError> {
        let response = self.get_response(request).await?;
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.send(Ok(ModelStreamEvent::ResponseStarted)).await;
        let _ = tx.send(Ok(ModelStreamEvent::ResponseDone { response })).await;
        Ok(rx)
    }
}
