// LLM collaborator contract
//
// The provider is external: one capability, `invoke`, returning content, a
// tool-call list, token usage, and cost. The response is untrusted - tool
// calls are extracted with a small grammar that tolerates models embedding
// JSON invocations in prose and malformed completion calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::tools::ToolDefinition;

/// Message roles on the conversation transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the conversation transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            tool_calls: None,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token accounting for one LLM call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from one LLM call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub cost_usd: f64,
}

/// The single LLM capability the platform consumes
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        tools: &[ToolDefinition],
        workspace_id: &str,
    ) -> Result<LlmResponse>;
}

// ============================================================================
// Tool-call extraction
// ============================================================================

/// Names the model may use to signal task completion
const COMPLETION_SENTINELS: [&str; 2] = ["completion", "task_complete"];

/// True when a tool name is the completion sentinel (case-insensitive,
/// substring match to tolerate decorated spellings like `final_completion`)
pub fn is_completion_call(name: &str) -> bool {
    let lower = name.to_lowercase();
    COMPLETION_SENTINELS.iter().any(|s| lower.contains(s))
}

/// Extract tool calls from an untrusted LLM response.
///
/// Grammar, in preference order:
/// 1. the structured `tool_calls` field;
/// 2. a JSON object embedded in the content with a recognizable shape
///    (`{"tool"|"name"|"function": ..., "arguments"|"args": ...}`);
/// 3. the completion sentinel detected by name substring even when the
///    surrounding JSON is malformed.
pub fn extract_tool_calls(response: &LlmResponse) -> Vec<ToolCall> {
    if !response.tool_calls.is_empty() {
        return response.tool_calls.clone();
    }

    if let Some(call) = parse_embedded_call(&response.content) {
        return vec![call];
    }

    // Last resort: the model tried to call the completion sentinel but the
    // JSON around it is broken. Recognize the intent anyway.
    if response.content.contains("task_complete") || response.content.contains("\"completion\"") {
        return vec![ToolCall {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: "completion".to_string(),
            arguments: serde_json::json!({ "result": response.content.clone() }),
        }];
    }

    Vec::new()
}

/// Scan content for the first JSON object that looks like a tool invocation
fn parse_embedded_call(content: &str) -> Option<ToolCall> {
    for candidate in json_object_candidates(content) {
        let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        let obj = value.as_object()?;

        let name = obj
            .get("tool")
            .or_else(|| obj.get("name"))
            .or_else(|| obj.get("function"))
            .and_then(Value::as_str)?;

        let arguments = obj
            .get("arguments")
            .or_else(|| obj.get("args"))
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        return Some(ToolCall {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.to_string(),
            arguments,
        });
    }
    None
}

/// Balanced-brace scan producing top-level `{...}` substrings
fn json_object_candidates(content: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            candidates.push(content[s..=i].to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(content: &str, tool_calls: Vec<ToolCall>) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            tool_calls,
            usage: TokenUsage::default(),
            cost_usd: 0.0,
        }
    }

    #[test]
    fn test_structured_calls_preferred() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "search".to_string(),
            arguments: json!({"q": "rust"}),
        };
        let resp = response("{\"tool\": \"other\"}", vec![call.clone()]);
        assert_eq!(extract_tool_calls(&resp), vec![call]);
    }

    #[test]
    fn test_embedded_json_call() {
        let resp = response(
            r#"I will search now. {"tool": "search", "arguments": {"q": "rust"}} Stand by."#,
            vec![],
        );
        let calls = extract_tool_calls(&resp);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"q": "rust"}));
    }

    #[test]
    fn test_embedded_call_alternate_spellings() {
        let resp = response(r#"{"name": "fetch_page", "args": {"url": "x"}}"#, vec![]);
        let calls = extract_tool_calls(&resp);
        assert_eq!(calls[0].name, "fetch_page");
        assert_eq!(calls[0].arguments, json!({"url": "x"}));
    }

    #[test]
    fn test_malformed_completion_recognized() {
        let resp = response(
            r#"{"tool": "task_complete", "arguments": {"result": "done"#,
            vec![],
        );
        let calls = extract_tool_calls(&resp);
        assert_eq!(calls.len(), 1);
        assert!(is_completion_call(&calls[0].name));
    }

    #[test]
    fn test_plain_text_yields_nothing() {
        let resp = response("The answer is 42.", vec![]);
        assert!(extract_tool_calls(&resp).is_empty());
    }

    #[test]
    fn test_is_completion_call() {
        assert!(is_completion_call("completion"));
        assert!(is_completion_call("task_complete"));
        assert!(is_completion_call("Task_Complete"));
        assert!(is_completion_call("final_completion"));
        assert!(!is_completion_call("search"));
    }

    #[test]
    fn test_json_candidates_skip_strings() {
        let content = r#"prefix {"a": "brace } inside"} suffix"#;
        let candidates = json_object_candidates(content);
        assert_eq!(candidates, vec![r#"{"a": "brace } inside"}"#.to_string()]);
    }
}
