// Collaborator clients
//
// The LLM provider, the MCP tool runtime, and the agent service are external
// collaborators with fixed interfaces. These clients speak plain HTTP to
// them; tests and single-box deployments use the static directory instead.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use relay_core::error::{PlatformError, Result};
use relay_core::llm::{ChatMessage, LlmClient, LlmResponse, TokenUsage, ToolCall};
use relay_core::tools::{ToolClient, ToolDefinition};
use relay_core::traits::{AgentDirectory, AgentSummary};
use relay_core::RequestContext;

// ============================================================================
// LLM gateway client (OpenAI-style chat completions)
// ============================================================================

pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Flat price applied when the gateway does not report cost itself
    usd_per_1k_tokens: f64,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            usd_per_1k_tokens: 0.0,
        }
    }

    pub fn with_pricing(mut self, usd_per_1k_tokens: f64) -> Self {
        self.usd_per_1k_tokens = usd_per_1k_tokens;
        self
    }

    fn message_to_wire(message: &ChatMessage) -> Value {
        let mut wire = json!({
            "role": message.role,
            "content": message.content,
        });
        if let Some(tool_call_id) = &message.tool_call_id {
            wire["tool_call_id"] = json!(tool_call_id);
        }
        if let Some(name) = &message.name {
            wire["name"] = json!(name);
        }
        if let Some(tool_calls) = &message.tool_calls {
            wire["tool_calls"] = Value::Array(
                tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.arguments.to_string(),
                            }
                        })
                    })
                    .collect(),
            );
        }
        wire
    }

    fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            return Vec::new();
        };
        calls
            .iter()
            .filter_map(|call| {
                let function = call.get("function")?;
                let name = function.get("name")?.as_str()?.to_string();
                let arguments = function
                    .get("arguments")
                    .and_then(Value::as_str)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_else(|| json!({}));
                Some(ToolCall {
                    id: call
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name,
                    arguments,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        tools: &[ToolDefinition],
        workspace_id: &str,
    ) -> Result<LlmResponse> {
        let mut body = json!({
            "model": model_id,
            "messages": messages.iter().map(Self::message_to_wire).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(|t| t.to_function_schema()).collect());
        }

        let mut request = self
            .http
            .post(format!(
                "{}/v1/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .header("x-workspace-id", workspace_id)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::dependency(format!("llm gateway: {e}")))?;
        if !response.status().is_success() {
            return Err(PlatformError::dependency(format!(
                "llm gateway returned {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::dependency(format!("llm gateway body: {e}")))?;

        let message = &payload["choices"][0]["message"];
        let usage = TokenUsage {
            prompt_tokens: payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: payload["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: payload["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32,
        };
        let cost_usd = payload["usage"]["cost"]
            .as_f64()
            .unwrap_or_else(|| usage.total_tokens as f64 / 1000.0 * self.usd_per_1k_tokens);

        Ok(LlmResponse {
            content: message["content"].as_str().unwrap_or_default().to_string(),
            tool_calls: Self::parse_tool_calls(message),
            usage,
            cost_usd,
        })
    }
}

// ============================================================================
// Tool-server client
// ============================================================================

pub struct HttpToolClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpToolClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ToolClient for HttpToolClient {
    async fn invoke(
        &self,
        name: &str,
        arguments: &Value,
        server_instance_id: Option<&str>,
        workspace_id: &str,
        tools_config: &Value,
    ) -> Result<Value> {
        let response = self
            .http
            .post(format!(
                "{}/v1/tools/invoke",
                self.base_url.trim_end_matches('/')
            ))
            .header("x-workspace-id", workspace_id)
            .json(&json!({
                "name": name,
                "arguments": arguments,
                "server_instance_id": server_instance_id,
                "tools_config": tools_config,
            }))
            .send()
            .await
            .map_err(|e| PlatformError::dependency(format!("tool server: {e}")))?;

        if !response.status().is_success() {
            return Err(PlatformError::dependency(format!(
                "tool server returned {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::dependency(format!("tool server body: {e}")))?;

        if let Some(error) = payload.get("error").and_then(Value::as_str) {
            return Err(PlatformError::dependency(format!("tool error: {error}")));
        }

        Ok(payload.get("result").cloned().unwrap_or(payload))
    }
}

// ============================================================================
// Agent directory
// ============================================================================

/// Reads agent configuration from the agent service (agent CRUD itself is
/// outside this system)
pub struct HttpAgentDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgentDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AgentDirectory for HttpAgentDirectory {
    async fn get(&self, agent_id: Uuid, ctx: &RequestContext) -> Result<Option<AgentSummary>> {
        let response = self
            .http
            .get(format!(
                "{}/v1/agents/{agent_id}",
                self.base_url.trim_end_matches('/')
            ))
            .header("x-workspace-id", &ctx.workspace_id)
            .header("x-user-id", &ctx.user_id)
            .send()
            .await
            .map_err(|e| PlatformError::dependency(format!("agent service: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(PlatformError::dependency(format!(
                "agent service returned {}",
                response.status()
            )));
        }

        let summary: AgentSummary = response
            .json()
            .await
            .map_err(|e| PlatformError::dependency(format!("agent service body: {e}")))?;
        Ok(Some(summary))
    }
}

/// Fixed in-memory agent directory for tests and single-box deployments
#[derive(Default, Clone)]
pub struct StaticAgentDirectory {
    agents: Arc<HashMap<Uuid, AgentSummary>>,
}

impl StaticAgentDirectory {
    pub fn new(agents: Vec<AgentSummary>) -> Self {
        Self {
            agents: Arc::new(agents.into_iter().map(|a| (a.id, a)).collect()),
        }
    }
}

#[async_trait]
impl AgentDirectory for StaticAgentDirectory {
    async fn get(&self, agent_id: Uuid, _ctx: &RequestContext) -> Result<Option<AgentSummary>> {
        Ok(self.agents.get(&agent_id).cloned())
    }
}
