//! Guardrail traits — pass/fail checks around a run.
//!
//! Input guardrails see the original input once, before the first model call.
//! Output guardrails see the final candidate output once, before completion.
//! A guardrail reports a tripwire; the runner decides what that means.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::FinalOutput;
use crate::context::RunContext;
use crate::error::GuardrailError;
use crate::item::AgentInputItem;

/// What a guardrail returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailOutput {
    /// Whether the guardrail's policy was violated.
    pub tripwire_triggered: bool,

    /// Diagnostic payload surfaced to the caller.
    #[serde(default)]
    pub info: serde_json::Value,
}

impl GuardrailOutput {
    pub fn pass() -> Self {
        Self {
            tripwire_triggered: false,
            info: serde_json::Value::Null,
        }
    }

    pub fn tripwire(info: serde_json::Value) -> Self {
        Self {
            tripwire_triggered: true,
            info,
        }
    }
}

/// A guardrail verdict tagged with the guardrail that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub guardrail: String,
    pub output: GuardrailOutput,
}

#[async_trait]
pub trait InputGuardrail: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        input: &[AgentInputItem],
        context: &RunContext,
    ) -> Result<GuardrailOutput, GuardrailError>;
}

#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        output: &FinalOutput,
        context: &RunContext,
    ) -> Result<GuardrailOutput, GuardrailError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_and_tripwire_constructors() {
        assert!(!GuardrailOutput::pass().tripwire_triggered);
        let trip = GuardrailOutput::tripwire(serde_json::json!({"reason": "pii"}));
        assert!(trip.tripwire_triggered);
        assert_eq!(trip.info["reason"], "pii");
    }
}
