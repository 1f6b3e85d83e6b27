//! Run-level error taxonomy.
//!
//! Collaborator errors (model, tool, guardrail) are classified here once they
//! cross the scheduler boundary. A pause for approval is not an error; it
//! surfaces as [`RunStatus::Interrupted`](crate::state::RunStatus).

use switchboard_core::{GuardrailError, ModelError, ToolError};
use thiserror::Error;

use crate::state::ExecutionState;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// The turn budget ran out. The state is still `Running` and can be
    /// resumed with a higher limit.
    #[error("Max turns ({max_turns}) exceeded")]
    MaxTurnsExceeded {
        max_turns: u32,
        state: Box<ExecutionState>,
    },

    #[error("Input guardrail '{guardrail}' tripwire triggered")]
    InputGuardrailTripwire {
        guardrail: String,
        info: serde_json::Value,
    },

    #[error("Output guardrail '{guardrail}' tripwire triggered")]
    OutputGuardrailTripwire {
        guardrail: String,
        info: serde_json::Value,
    },

    #[error("Guardrail error: {0}")]
    Guardrail(#[from] GuardrailError),

    /// Only raised when tool failures are configured as fatal. A run
    /// aborted this way carries its `Failed` state.
    #[error("Tool '{tool_name}' failed: {source}")]
    ToolInvocation {
        tool_name: String,
        source: ToolError,
        state: Option<Box<ExecutionState>>,
    },

    #[error("Resume state mismatch: {0}")]
    ResumeStateMismatch(String),

    #[error("Cannot resume: {} approval(s) unresolved ({})", .pending.len(), .pending.join(", "))]
    ApprovalsUnresolved { pending: Vec<String> },

    #[error("No pending approval with id '{0}'")]
    UnknownApproval(String),

    #[error("Run state is already finalized")]
    StateFinalized,

    /// The run was cancelled. The state keeps every item folded in before
    /// the signal arrived.
    #[error("Run cancelled")]
    Cancelled { state: Box<ExecutionState> },

    #[error("Unknown item type: {0}")]
    UnknownItemType(String),

    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedSnapshotVersion { found: u32, expected: u32 },

    #[error("Model behavior error: {0}")]
    ModelBehavior(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RunError {
    /// The state carried by the error, when there is one.
    pub fn state(&self) -> Option<&ExecutionState> {
        match self {
            RunError::MaxTurnsExceeded { state, .. } | RunError::Cancelled { state } => Some(state),
            RunError::ToolInvocation { state, .. } => state.as_deref(),
            _ => None,
        }
    }
}

impl From<switchboard_core::Error> for RunError {
    fn from(err: switchboard_core::Error) -> Self {
        use switchboard_core::Error;
        match err {
            Error::Model(e) => RunError::Model(e),
            Error::Tool(e) => {
                let tool_name = match &e {
                    ToolError::ExecutionFailed { tool_name, .. }
                    | ToolError::Timeout { tool_name, .. } => tool_name.clone(),
                    ToolError::NotFound(name) => name.clone(),
                    ToolError::InvalidArguments(_) => String::new(),
                };
                RunError::ToolInvocation {
                    tool_name,
                    source: e,
                    state: None,
                }
            }
            Error::Guardrail(e) => RunError::Guardrail(e),
            Error::UnknownItemType(tag) => RunError::UnknownItemType(tag),
            Error::Config { message } => RunError::Config(message),
            Error::Serialization(e) => RunError::Serialization(e),
        }
    }
}

impl From<switchboard_config::ConfigError> for RunError {
    fn from(err: switchboard_config::ConfigError) -> Self {
        RunError::Config(err.to_string())
    }
}

/// Result type alias for run operations.
pub type Result<T> = std::result::Result<T, RunError>;
