//! Agent definitions and the hand-off graph.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::EventBus;
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::model::{HandoffDefinition, Model, ModelSettings, ToolDefinition};
use crate::tool::Tool;

/// The shape an agent's final answer must have.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputType {
    /// Free text.
    #[default]
    Text,
    /// A JSON document described by a schema.
    Json { schema: serde_json::Value },
}

impl OutputType {
    /// Check a candidate final message against this shape.
    ///
    /// JSON outputs must parse, must be an object when the schema says so,
    /// and must carry every top-level `required` key.
    pub fn parse_final(&self, text: &str) -> Result<FinalOutput, String> {
        match self {
            OutputType::Text => Ok(FinalOutput::Text(text.to_string())),
            OutputType::Json { schema } => {
                let value: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| format!("final output is not valid JSON: {e}"))?;
                if schema.get("type").and_then(|t| t.as_str()) == Some("object") {
                    let Some(object) = value.as_object() else {
                        return Err("final output must be a JSON object".into());
                    };
                    let required = schema
                        .get("required")
                        .and_then(|r| r.as_array())
                        .map(|r| r.iter().filter_map(|k| k.as_str()).collect::<Vec<_>>())
                        .unwrap_or_default();
                    if let Some(missing) = required.iter().find(|k| !object.contains_key(**k)) {
                        return Err(format!("final output is missing required key '{missing}'"));
                    }
                }
                Ok(FinalOutput::Json(value))
            }
        }
    }

    pub fn schema(&self) -> Option<&serde_json::Value> {
        match self {
            OutputType::Text => None,
            OutputType::Json { schema } => Some(schema),
        }
    }
}

/// The answer a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FinalOutput {
    Text(String),
    Json(serde_json::Value),
}

impl FinalOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FinalOutput::Text(text) => Some(text),
            FinalOutput::Json(_) => None,
        }
    }
}

impl fmt::Display for FinalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalOutput::Text(text) => f.write_str(text),
            FinalOutput::Json(value) => write!(f, "{value}"),
        }
    }
}

/// What happens after the agent's tools have run in a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolUseBehavior {
    /// Send the tool results back to the model.
    #[default]
    RunLlmAgain,
    /// Use the first tool result of the turn as the final output.
    StopOnFirstTool,
}

/// An edge of the hand-off graph.
#[derive(Clone)]
pub struct Handoff {
    pub agent: Arc<Agent>,
    pub tool_name: String,
    pub description: String,
}

impl Handoff {
    /// Hand off to `agent` through a tool named `transfer_to_<agent>`.
    pub fn to(agent: Arc<Agent>) -> Self {
        let tool_name = format!("transfer_to_{}", snake_case(&agent.name));
        let description = format!("Handoff to the {} agent to handle the request.", agent.name);
        Self {
            agent,
            tool_name,
            description,
        }
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn to_definition(&self) -> HandoffDefinition {
        HandoffDefinition {
            tool_name: self.tool_name.clone(),
            description: self.description.clone(),
            target: self.agent.name.clone(),
        }
    }
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("tool_name", &self.tool_name)
            .field("target", &self.agent.name)
            .finish()
    }
}

/// A configured agent: instructions, tools, hand-off targets, output shape.
pub struct Agent {
    pub name: String,
    pub instructions: Option<String>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub handoffs: Vec<Handoff>,
    pub output_type: OutputType,
    /// Overrides the runner's default model when set.
    pub model: Option<Arc<dyn Model>>,
    pub model_settings: ModelSettings,
    pub input_guardrails: Vec<Arc<dyn InputGuardrail>>,
    pub output_guardrails: Vec<Arc<dyn OutputGuardrail>>,
    pub tool_use_behavior: ToolUseBehavior,
    /// Agent-scoped lifecycle subscribers.
    pub hooks: Option<Arc<EventBus>>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            tools: Vec::new(),
            handoffs: Vec::new(),
            output_type: OutputType::Text,
            model: None,
            model_settings: ModelSettings::default(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            tool_use_behavior: ToolUseBehavior::default(),
            hooks: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_handoff(mut self, handoff: Handoff) -> Self {
        self.handoffs.push(handoff);
        self
    }

    pub fn with_output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = output_type;
        self
    }

    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: Arc<dyn InputGuardrail>) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn OutputGuardrail>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn with_tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.tool_use_behavior = behavior;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<EventBus>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn handoff(&self, tool_name: &str) -> Option<&Handoff> {
        self.handoffs.iter().find(|h| h.tool_name == tool_name)
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    pub fn handoff_definitions(&self) -> Vec<HandoffDefinition> {
        self.handoffs.iter().map(Handoff::to_definition).collect()
    }

    /// Find an agent by name in the hand-off graph rooted at `self`.
    pub fn find(self: &Arc<Self>, name: &str) -> Option<Arc<Agent>> {
        self.graph().into_iter().find(|a| a.name == name)
    }

    /// Every agent reachable from `self`, depth-first, each listed once.
    pub fn graph(self: &Arc<Self>) -> Vec<Arc<Agent>> {
        let mut seen: Vec<Arc<Agent>> = Vec::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(agent) = stack.pop() {
            if seen.iter().any(|a| Arc::ptr_eq(a, &agent)) {
                continue;
            }
            for handoff in agent.handoffs.iter().rev() {
                stack.push(Arc::clone(&handoff.agent));
            }
            seen.push(agent);
        }
        seen
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("handoffs", &self.handoffs)
            .field("output_type", &self.output_type)
            .field("model", &self.model.as_ref().map(|m| m.name()))
            .field("tool_use_behavior", &self.tool_use_behavior)
            .finish()
    }
}

fn snake_case(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_tool_name_is_snake_cased() {
        let billing = Arc::new(Agent::new("Billing Agent"));
        let handoff = Handoff::to(billing);
        assert_eq!(handoff.tool_name, "transfer_to_billing_agent");
        assert_eq!(handoff.to_definition().target, "Billing Agent");
    }

    #[test]
    fn graph_walk_finds_nested_agents_once() {
        let leaf = Arc::new(Agent::new("leaf"));
        let left = Arc::new(Agent::new("left").with_handoff(Handoff::to(leaf.clone())));
        let right = Arc::new(Agent::new("right").with_handoff(Handoff::to(leaf)));
        let root = Arc::new(
            Agent::new("root")
                .with_handoff(Handoff::to(left))
                .with_handoff(Handoff::to(right)),
        );

        let names: Vec<_> = root.graph().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["root", "left", "leaf", "right"]);
        assert!(root.find("leaf").is_some());
        assert!(root.find("missing").is_none());
    }

    #[test]
    fn text_output_accepts_anything() {
        let out = OutputType::Text.parse_final("hello").unwrap();
        assert_eq!(out.as_text(), Some("hello"));
    }

    #[test]
    fn json_output_checks_required_keys() {
        let output_type = OutputType::Json {
            schema: serde_json::json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            }),
        };
        let ok = output_type.parse_final(r#"{"city": "San Francisco"}"#).unwrap();
        assert_eq!(ok, FinalOutput::Json(serde_json::json!({"city": "San Francisco"})));

        assert!(output_type.parse_final(r#"{"town": "x"}"#).is_err());
        assert!(output_type.parse_final("[1, 2]").is_err());
        assert!(output_type.parse_final("not json").is_err());
    }

    #[test]
    fn final_output_display() {
        assert_eq!(FinalOutput::Text("done".into()).to_string(), "done");
        assert_eq!(
            FinalOutput::Json(serde_json::json!({"a": 1})).to_string(),
            r#"{"a":1}"#
        );
    }
}
