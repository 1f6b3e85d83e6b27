//! Run scripts: an agent graph plus the model responses to replay.
//!
//! ```json
//! {
//!   "starting_agent": "triage",
//!   "input": "I want a refund",
//!   "memory": { "mode": "server_conversation", "conversation_id": "conv_1" },
//!   "agents": [
//!     { "name": "triage", "handoffs": ["billing"],
//!       "tools": [{ "name": "lookup_order" }] },
//!     { "name": "billing", "instructions": "Handle refunds.",
//!       "tools": [{ "name": "issue_refund", "needs_approval": true }] }
//!   ],
//!   "responses": [
//!     { "output": [{ "type": "tool_call", "call_id": "h1", "name": "transfer_to_billing" }] },
//!     { "output": [{ "type": "assistant_message", "content": "Refund issued." }] }
//!   ]
//! }
//! ```
//!
//! Script tools echo their `text` argument back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use switchboard_core::{Agent, ConversationMemory, Handoff, ModelResponse, OutputType, ToolUseBehavior};
use switchboard_runner::test_support::{EchoTool, ScriptedModel};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse script: {0}")]
    Parse(String),

    #[error("Unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("Agent '{0}' is defined twice")]
    DuplicateAgent(String),

    #[error("Hand-off cycle through agent '{0}'")]
    Cycle(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub starting_agent: String,

    /// Default user input for `run`.
    #[serde(default)]
    pub input: Option<String>,

    #[serde(default)]
    pub memory: Option<ConversationMemory>,

    pub agents: Vec<AgentSpec>,

    /// Model responses, one per turn, in order.
    #[serde(default)]
    pub responses: Vec<ModelResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub name: String,

    #[serde(default)]
    pub instructions: Option<String>,

    #[serde(default)]
    pub tools: Vec<ToolSpec>,

    /// Names of agents this one can hand off to.
    #[serde(default)]
    pub handoffs: Vec<String>,

    #[serde(default)]
    pub output_type: OutputType,

    #[serde(default)]
    pub tool_use_behavior: ToolUseBehavior,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    pub name: String,

    #[serde(default)]
    pub needs_approval: bool,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let content = std::fs::read_to_string(path).map_err(|e| ScriptError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        serde_json::from_str(json).map_err(|e| ScriptError::Parse(e.to_string()))
    }

    /// Build the agent graph and return the starting agent.
    pub fn build_agents(&self) -> Result<Arc<Agent>, ScriptError> {
        let mut specs: HashMap<&str, &AgentSpec> = HashMap::new();
        for spec in &self.agents {
            if specs.insert(spec.name.as_str(), spec).is_some() {
                return Err(ScriptError::DuplicateAgent(spec.name.clone()));
            }
        }

        let mut built = HashMap::new();
        let mut visiting = Vec::new();
        build_agent(&self.starting_agent, &specs, &mut built, &mut visiting)
    }

    /// A model replaying the responses, minus the first `consumed` of them.
    pub fn model(&self, consumed: usize) -> ScriptedModel {
        ScriptedModel::new(self.responses.iter().skip(consumed).cloned().collect())
    }
}

fn build_agent(
    name: &str,
    specs: &HashMap<&str, &AgentSpec>,
    built: &mut HashMap<String, Arc<Agent>>,
    visiting: &mut Vec<String>,
) -> Result<Arc<Agent>, ScriptError> {
    if let Some(agent) = built.get(name) {
        return Ok(agent.clone());
    }
    if visiting.iter().any(|v| v == name) {
        return Err(ScriptError::Cycle(name.to_string()));
    }
    let spec = specs
        .get(name)
        .ok_or_else(|| ScriptError::UnknownAgent(name.to_string()))?;

    visiting.push(name.to_string());
    let mut agent = Agent::new(&spec.name)
        .with_output_type(spec.output_type.clone())
        .with_tool_use_behavior(spec.tool_use_behavior);
    if let Some(instructions) = &spec.instructions {
        agent = agent.with_instructions(instructions);
    }
    for tool in &spec.tools {
        let echo = EchoTool::new(&tool.name);
        agent = agent.with_tool(Arc::new(if tool.needs_approval {
            echo.needing_approval()
        } else {
            echo
        }));
    }
    for target in &spec.handoffs {
        let target = build_agent(target, specs, built, visiting)?;
        agent = agent.with_handoff(Handoff::to(target));
    }
    visiting.pop();

    let agent = Arc::new(agent);
    built.insert(name.to_string(), agent.clone());
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"{
        "starting_agent": "triage",
        "input": "refund please",
        "agents": [
            { "name": "triage", "handoffs": ["billing"] },
            { "name": "billing", "instructions": "Handle refunds.",
              "tools": [{ "name": "issue_refund", "needs_approval": true }] }
        ],
        "responses": [
            { "output": [{ "type": "tool_call", "call_id": "h1", "name": "transfer_to_billing" }] },
            { "output": [{ "type": "assistant_message", "content": "Refund issued." }] }
        ]
    }"#;

    #[test]
    fn builds_the_handoff_graph() {
        let script = Script::from_json(SCRIPT).unwrap();
        let triage = script.build_agents().unwrap();
        assert_eq!(triage.name, "triage");
        assert_eq!(triage.handoffs[0].tool_name, "transfer_to_billing");

        let billing = triage.find("billing").unwrap();
        assert_eq!(billing.instructions.as_deref(), Some("Handle refunds."));
        assert!(billing.tool("issue_refund").is_some());
    }

    #[test]
    fn model_skips_consumed_responses() {
        let script = Script::from_json(SCRIPT).unwrap();
        assert_eq!(script.model(0).remaining(), 2);
        assert_eq!(script.model(1).remaining(), 1);
        assert_eq!(script.model(5).remaining(), 0);
    }

    #[test]
    fn unknown_and_cyclic_agents_are_rejected() {
        let unknown = Script::from_json(
            r#"{ "starting_agent": "a", "agents": [{ "name": "a", "handoffs": ["ghost"] }] }"#,
        )
        .unwrap();
        assert!(matches!(unknown.build_agents(), Err(ScriptError::UnknownAgent(n)) if n == "ghost"));

        let cyclic = Script::from_json(
            r#"{ "starting_agent": "a", "agents": [
                { "name": "a", "handoffs": ["b"] },
                { "name": "b", "handoffs": ["a"] }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(cyclic.build_agents(), Err(ScriptError::Cycle(n)) if n == "a"));
    }

    #[test]
    fn duplicate_agents_are_rejected() {
        let script = Script::from_json(
            r#"{ "starting_agent": "a", "agents": [{ "name": "a" }, { "name": "a" }] }"#,
        )
        .unwrap();
        assert!(matches!(script.build_agents(), Err(ScriptError::DuplicateAgent(_))));
    }

    #[test]
    fn malformed_items_fail_to_parse() {
        let err = Script::from_json(
            r#"{ "starting_agent": "a", "agents": [{ "name": "a" }],
                 "responses": [{ "output": [{ "type": "computer_call" }] }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::Parse(_)));
    }
}
