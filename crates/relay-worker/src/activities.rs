// Workflow activities - the retriable, non-deterministic I/O units
//
// Every activity runs under a bounded retry policy with a start-to-close
// timeout. Event publishing is the exception: one attempt, fire-and-forget,
// because losing an event must never fail a workflow.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use relay_core::error::{PlatformError, Result};
use relay_core::events::DomainEvent;
use relay_core::llm::{ChatMessage, LlmClient, LlmResponse, ToolCall};
use relay_core::tools::{ToolClient, ToolDefinition};
use relay_core::traits::{AgentDirectory, AgentSummary, EventPublisher};
use relay_core::RequestContext;

/// Bounded retry with a per-attempt start-to-close timeout
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const BUILD_AGENT_CONFIG: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        timeout: Duration::from_secs(300),
    };
    pub const DISCOVER_TOOLS: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        timeout: Duration::from_secs(300),
    };
    pub const INVOKE_LLM: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        timeout: Duration::from_secs(120),
    };
    pub const INVOKE_TOOL: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        timeout: Duration::from_secs(180),
    };
    pub const PUBLISH_EVENTS: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        timeout: Duration::from_secs(5),
    };
}

/// Run an operation under a retry policy. Each attempt is bounded by the
/// policy timeout; the last error is surfaced after exhaustion.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!(activity = label, attempt, error = %e, "activity attempt failed");
                last_error = Some(e);
            }
            Err(_) => {
                warn!(activity = label, attempt, "activity attempt timed out");
                last_error = Some(PlatformError::timeout(format!(
                    "{label} exceeded {}s",
                    policy.timeout.as_secs()
                )));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PlatformError::dependency(format!("{label} failed"))))
}

/// The activity surface the agent execution workflow schedules
#[async_trait]
pub trait Activities: Send + Sync {
    async fn build_agent_config(
        &self,
        agent_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<AgentSummary>;

    async fn discover_available_tools(
        &self,
        agent_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<Vec<ToolDefinition>>;

    async fn invoke_llm(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        tools: &[ToolDefinition],
        workspace_id: &str,
    ) -> Result<LlmResponse>;

    async fn invoke_tool(
        &self,
        call: &ToolCall,
        definition: Option<&ToolDefinition>,
        workspace_id: &str,
        tools_config: &Value,
    ) -> Result<Value>;

    /// Best-effort; the caller swallows failures
    async fn publish_workflow_events(&self, events: Vec<DomainEvent>) -> Result<()>;
}

/// Production activities backed by the agent directory, LLM and tool-server
/// clients, and the event bus
pub struct WorkerActivities {
    directory: Arc<dyn AgentDirectory>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolClient>,
    publisher: Arc<dyn EventPublisher>,
}

impl WorkerActivities {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolClient>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            directory,
            llm,
            tools,
            publisher,
        }
    }
}

#[async_trait]
impl Activities for WorkerActivities {
    async fn build_agent_config(
        &self,
        agent_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<AgentSummary> {
        with_retry(RetryPolicy::BUILD_AGENT_CONFIG, "build_agent_config", || {
            let ctx = ctx.clone();
            async move {
                self.directory
                    .get(agent_id, &ctx)
                    .await?
                    .ok_or_else(|| PlatformError::not_found(format!("agent {agent_id}")))
            }
        })
        .await
    }

    async fn discover_available_tools(
        &self,
        agent_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<Vec<ToolDefinition>> {
        with_retry(
            RetryPolicy::DISCOVER_TOOLS,
            "discover_available_tools",
            || {
                let ctx = ctx.clone();
                async move {
                    let agent = self
                        .directory
                        .get(agent_id, &ctx)
                        .await?
                        .ok_or_else(|| PlatformError::not_found(format!("agent {agent_id}")))?;
                    Ok(parse_tools_config(&agent.tools_config))
                }
            },
        )
        .await
    }

    async fn invoke_llm(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        tools: &[ToolDefinition],
        workspace_id: &str,
    ) -> Result<LlmResponse> {
        with_retry(RetryPolicy::INVOKE_LLM, "invoke_llm", || async {
            self.llm.invoke(messages, model_id, tools, workspace_id).await
        })
        .await
    }

    async fn invoke_tool(
        &self,
        call: &ToolCall,
        definition: Option<&ToolDefinition>,
        workspace_id: &str,
        tools_config: &Value,
    ) -> Result<Value> {
        let server_instance_id = definition.and_then(|d| d.server_instance_id.as_deref());
        with_retry(RetryPolicy::INVOKE_TOOL, "invoke_tool", || async {
            self.tools
                .invoke(
                    &call.name,
                    &call.arguments,
                    server_instance_id,
                    workspace_id,
                    tools_config,
                )
                .await
        })
        .await
    }

    async fn publish_workflow_events(&self, events: Vec<DomainEvent>) -> Result<()> {
        with_retry(RetryPolicy::PUBLISH_EVENTS, "publish_workflow_events", || {
            let events = events.clone();
            async move { self.publisher.publish_batch(events).await }
        })
        .await
    }
}

/// Normalize an agent's tools_config into tool definitions. Accepts either a
/// bare array of definitions or an object with a `tools` array.
pub fn parse_tools_config(tools_config: &Value) -> Vec<ToolDefinition> {
    let entries = match tools_config {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(map) => match map.get("tools").and_then(Value::as_array) {
            Some(entries) => entries.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter_map(|entry| serde_json::from_value::<ToolDefinition>(entry.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retry_succeeds_after_failures() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(1),
        };

        let result = with_retry(policy, "flaky", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PlatformError::dependency("transient"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            timeout: Duration::from_secs(1),
        };

        let result: Result<()> = with_retry(policy, "down", || async {
            Err(PlatformError::dependency("still down"))
        })
        .await;

        assert!(matches!(result, Err(PlatformError::Dependency(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_times_out() {
        let policy = RetryPolicy {
            max_attempts: 1,
            timeout: Duration::from_millis(50),
        };

        let result: Result<()> = with_retry(policy, "hung", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(PlatformError::Timeout(_))));
    }

    #[test]
    fn test_parse_tools_config_shapes() {
        let bare = json!([
            {"name": "search", "description": "Search", "parameters": {"type": "object"}}
        ]);
        assert_eq!(parse_tools_config(&bare).len(), 1);

        let wrapped = json!({"tools": [
            {"name": "search", "description": "Search"},
            {"name": "fetch", "description": "Fetch", "requires_user_confirmation": true}
        ]});
        let tools = parse_tools_config(&wrapped);
        assert_eq!(tools.len(), 2);
        assert!(tools[1].requires_user_confirmation);

        assert!(parse_tools_config(&json!("not tools")).is_empty());
        assert!(parse_tools_config(&json!({})).is_empty());
    }
}
