//! Conversation items — the entries that make up a run's history.
//!
//! Every request to a model and every piece of model output is expressed as a
//! sequence of [`AgentInputItem`]s. Items are immutable once created; their
//! order inside a run is the causal order in which they were generated.

use serde::{Deserialize, Serialize};

use crate::error::{Error, ToolError};

/// Every tag the item model understands, in declaration order.
pub const ITEM_TYPES: &[&str] = &[
    "user_message",
    "assistant_message",
    "tool_call",
    "tool_result",
    "handoff_call",
    "handoff_result",
    "approval_request",
    "approval_response",
    "reasoning",
    "unknown",
];

/// A single conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentInputItem {
    /// Input written by the end user.
    UserMessage { content: String },

    /// Text produced by the model.
    AssistantMessage {
        content: String,
        /// Name of the agent that produced the message, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },

    /// A function tool invocation requested by the model.
    ToolCall(ToolCall),

    /// The output of a function tool invocation.
    ToolResult(ToolResult),

    /// A hand-off requested by the model (a tool call naming a hand-off tool).
    HandoffCall(HandoffCall),

    /// Acknowledgement that control moved to another agent.
    HandoffResult(HandoffResult),

    /// A tool call that is waiting for a caller decision.
    ApprovalRequest(ApprovalRequest),

    /// The caller's decision on a hosted (provider-side) approval request.
    ApprovalResponse { request_id: String, approved: bool },

    /// Model reasoning summary.
    Reasoning { content: String },

    /// Provider-specific payload the item model has no variant for.
    Unknown { provider_data: serde_json::Value },
}

impl AgentInputItem {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::UserMessage {
            content: content.into(),
        }
    }

    /// Create an assistant message with no agent attribution.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::AssistantMessage {
            content: content.into(),
            agent: None,
        }
    }

    /// Parse an item from its JSON form.
    ///
    /// A `type` tag outside [`ITEM_TYPES`] is rejected with
    /// [`Error::UnknownItemType`] instead of being dropped.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::UnknownItemType("<missing>".into()))?;
        if !ITEM_TYPES.contains(&tag) {
            return Err(Error::UnknownItemType(tag.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The serialized type tag of this item.
    pub fn item_type(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::ToolCall(_) => "tool_call",
            Self::ToolResult(_) => "tool_result",
            Self::HandoffCall(_) => "handoff_call",
            Self::HandoffResult(_) => "handoff_result",
            Self::ApprovalRequest(_) => "approval_request",
            Self::ApprovalResponse { .. } => "approval_response",
            Self::Reasoning { .. } => "reasoning",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Whether the item is part of what a model sees.
    ///
    /// Approval requests are local bookkeeping: the model already knows about
    /// the call they wrap, and the decision travels as a result or response.
    pub fn is_model_input(&self) -> bool {
        match self {
            Self::ApprovalRequest(_) => false,
            Self::UserMessage { .. }
            | Self::AssistantMessage { .. }
            | Self::ToolCall(_)
            | Self::ToolResult(_)
            | Self::HandoffCall(_)
            | Self::HandoffResult(_)
            | Self::ApprovalResponse { .. }
            | Self::Reasoning { .. }
            | Self::Unknown { .. } => true,
        }
    }

    /// Text content for message items.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::UserMessage { content } | Self::AssistantMessage { content, .. } => {
                Some(content)
            }
            _ => None,
        }
    }
}

/// A tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the call with its result.
    pub call_id: String,

    /// Name of the tool to invoke.
    pub name: String,

    /// Arguments as a JSON string, exactly as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Decode the argument string. An empty string decodes to `{}`.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, ToolError> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", self.name)))
    }
}

/// The output of a tool invocation, folded back into the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,

    pub output: String,

    /// Set when the invocation failed and `output` describes the failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: message.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffCall {
    pub call_id: String,

    /// The hand-off tool name the model called.
    pub tool_name: String,

    /// Name of the agent receiving control.
    pub target: String,

    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffResult {
    pub call_id: String,
    pub target: String,
    pub output: String,
}

/// Where an approval request originated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// A local function tool whose `needs_approval` returned true.
    #[default]
    Function,
    /// A provider-hosted tool that asked for approval in the model output.
    Hosted,
}

/// A tool call paused until the caller approves or rejects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Decision key. For function tools this is the call id.
    pub id: String,

    pub tool_call: ToolCall,

    #[serde(default)]
    pub kind: ApprovalKind,
}

impl ApprovalRequest {
    pub fn for_function(call: ToolCall) -> Self {
        Self {
            id: call.call_id.clone(),
            tool_call: call,
            kind: ApprovalKind::Function,
        }
    }

    pub fn hosted(id: impl Into<String>, call: ToolCall) -> Self {
        Self {
            id: id.into(),
            tool_call: call,
            kind: ApprovalKind::Hosted,
        }
    }
}

/// A caller's verdict on an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}
