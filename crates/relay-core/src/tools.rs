// Tool-server collaborator contract
//
// The MCP tool runtime is external; the platform consumes one capability,
// `invoke`. Tool definitions are normalized to the OpenAI-style function
// schema before being handed to the LLM.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

/// A tool available to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the arguments object
    #[serde(default = "empty_schema")]
    pub parameters: Value,
    /// Tool-server instance that hosts this tool, when remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_instance_id: Option<String>,
    /// Tool must be confirmed by a human before each invocation
    #[serde(default)]
    pub requires_user_confirmation: bool,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_schema(),
            server_instance_id: None,
            requires_user_confirmation: false,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_confirmation(mut self) -> Self {
        self.requires_user_confirmation = true;
        self
    }

    /// OpenAI-style function schema for the LLM request
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// The builtin completion sentinel, always offered to the agent
pub fn completion_tool() -> ToolDefinition {
    ToolDefinition::new(
        "completion",
        "Call when the task is complete. Pass the final answer in `result`.",
    )
    .with_parameters(json!({
        "type": "object",
        "properties": {
            "result": {"type": "string", "description": "Final answer for the user"},
            "success": {"type": "boolean", "description": "Whether the goal was achieved"},
        },
        "required": ["result"],
    }))
}

/// The single tool-invocation capability the platform consumes
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn invoke(
        &self,
        name: &str,
        arguments: &Value,
        server_instance_id: Option<&str>,
        workspace_id: &str,
        tools_config: &Value,
    ) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_schema_shape() {
        let tool = ToolDefinition::new("search", "Search the web").with_parameters(json!({
            "type": "object",
            "properties": {"q": {"type": "string"}},
            "required": ["q"],
        }));

        let schema = tool.to_function_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "search");
        assert_eq!(
            schema["function"]["parameters"]["required"],
            json!(["q"])
        );
    }

    #[test]
    fn test_completion_tool_requires_result() {
        let tool = completion_tool();
        assert_eq!(tool.name, "completion");
        assert_eq!(tool.parameters["required"], json!(["result"]));
    }
}
