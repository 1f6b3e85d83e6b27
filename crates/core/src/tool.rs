//! Tool trait — the abstraction over agent capabilities.
//!
//! Only the invocation contract lives here: a name, a schema for the model,
//! an approval gate and `invoke`. Concrete tools are supplied by the caller.

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::ToolError;
use crate::model::ToolDefinition;

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Whether this call must be approved by the caller before it runs.
    async fn needs_approval(&self, _arguments: &serde_json::Value, _context: &RunContext) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn invoke(
        &self,
        arguments: serde_json::Value,
        context: &RunContext,
    ) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn invoke(
            &self,
            arguments: serde_json::Value,
            _context: &RunContext,
        ) -> Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    #[test]
    fn definition_carries_schema() {
        let def = EchoTool.to_definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.parameters["required"][0], "text");
    }

    #[tokio::test]
    async fn default_gate_auto_approves() {
        let ctx = RunContext::new();
        assert!(!EchoTool.needs_approval(&serde_json::json!({}), &ctx).await);
    }

    #[tokio::test]
    async fn invoke_echoes() {
        let ctx = RunContext::new();
        let out = EchoTool
            .invoke(serde_json::json!({"text": "hello world"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }
}
