//! Error types for the switchboard domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary (model, tool, guardrail) has its own error enum;
//! the run-level taxonomy lives in `switchboard-runner`.

use thiserror::Error;

/// The top-level error type for core (item / serialization level) operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Guardrail errors ---
    #[error("Guardrail error: {0}")]
    Guardrail(#[from] GuardrailError),

    // --- Item model ---
    #[error("Unknown item type: {0}")]
    UnknownItemType(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Collaborator errors ---

/// Failures reported by a model backend. The core never retries these.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Model request failed: {message}")]
    Request { message: String },

    #[error("Model stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Model request timed out: {0}")]
    Timeout(String),

    #[error("No response available: {0}")]
    NoResponse(String),

    #[error("Model not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum GuardrailError {
    #[error("Guardrail '{guardrail}' failed to execute: {reason}")]
    ExecutionFailed { guardrail: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_displays_correctly() {
        let err = Error::Model(ModelError::Request {
            message: "upstream returned 502".into(),
        });
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "weather".into(),
            reason: "city not found".into(),
        });
        assert!(err.to_string().contains("weather"));
        assert!(err.to_string().contains("city not found"));
    }

    #[test]
    fn unknown_item_type_names_the_tag() {
        let err = Error::UnknownItemType("computer_call".into());
        assert_eq!(err.to_string(), "Unknown item type: computer_call");
    }
}
