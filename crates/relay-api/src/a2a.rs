// Agent-to-agent JSON-RPC adapter
//
// A thin, mechanical mapping over the task orchestrator: task ids are
// preserved, statuses map onto A2A states (`cancelled` -> `canceled`,
// `running` -> `working`, `paused` -> `input-required`). The streaming
// method returns SSE frames over the same replay+live event stream the task
// API serves.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use relay_core::task::{Task, TaskStatus};
use relay_core::task_service::TaskOrchestrator;
use relay_core::traits::{TaskLauncher, TaskRequest};
use relay_core::RequestContext;
use relay_worker::Platform;

use crate::auth::AuthVerifier;
use crate::error::ApiError;

// JSON-RPC 2.0 error codes, plus the A2A-specific range
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const TASK_NOT_FOUND: i64 = -32001;
pub const TASK_NOT_CANCELLABLE: i64 = -32002;

#[derive(Clone)]
pub struct AppState {
    pub platform: Platform,
    pub auth: Arc<AuthVerifier>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/agents/:agent_id/a2a/rpc", post(handle_rpc))
        .route("/v1/agents/:agent_id/a2a/well-known", get(agent_card))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

fn rpc_result(id: &Value, result: Value) -> Response {
    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
}

fn rpc_error(id: &Value, code: i64, message: &str) -> Response {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    }))
    .into_response()
}

/// Map a task status onto the A2A task state vocabulary
pub fn a2a_state(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Submitted | TaskStatus::Pending => "submitted",
        TaskStatus::Running => "working",
        TaskStatus::Paused => "input-required",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "canceled",
    }
}

/// A2A task object; the task id is preserved verbatim
fn a2a_task(task: &Task) -> Value {
    let mut artifacts = Vec::new();
    if let Some(result) = &task.result {
        if let Some(text) = result.get("final_response").and_then(Value::as_str) {
            artifacts.push(json!({
                "parts": [{"kind": "text", "text": text}],
            }));
        }
    }

    json!({
        "kind": "task",
        "id": task.id,
        "contextId": task.agent_id,
        "status": {
            "state": a2a_state(task.status),
            "timestamp": task.updated_at,
        },
        "artifacts": artifacts,
    })
}

/// Pull the message text out of `tasks/send` / `message/send` params;
/// accepts the parts array or a bare text field.
pub fn extract_message_text(params: &Value) -> Option<String> {
    if let Some(parts) = params.pointer("/message/parts").and_then(Value::as_array) {
        let text: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        if !text.is_empty() {
            return Some(text.join("\n"));
        }
    }
    params
        .pointer("/message/content")
        .or_else(|| params.pointer("/message/text"))
        .or_else(|| params.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn handle_rpc(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let ctx = match state.auth.context_from_headers(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return ApiError(e).into_response(),
    };
    let orchestrator = state.platform.task_orchestrator(ctx.clone());

    let Ok(raw) = serde_json::from_str::<Value>(&body) else {
        return rpc_error(&Value::Null, PARSE_ERROR, "parse error");
    };
    let Ok(request) = serde_json::from_value::<JsonRpcRequest>(raw) else {
        return rpc_error(&Value::Null, INVALID_REQUEST, "invalid request");
    };
    if request.jsonrpc != "2.0" {
        return rpc_error(&request.id, INVALID_REQUEST, "invalid request");
    }

    match request.method.as_str() {
        "tasks/send" | "message/send" => {
            send_task(&orchestrator, agent_id, &ctx, &request, false).await
        }
        "message/stream" => send_task(&orchestrator, agent_id, &ctx, &request, true).await,
        "tasks/get" => get_rpc_task(&orchestrator, &request).await,
        "tasks/cancel" => cancel_rpc_task(&orchestrator, &request).await,
        "agent/authenticatedExtendedCard" => {
            agent_card_result(&state, agent_id, &ctx, &request).await
        }
        _ => rpc_error(&request.id, METHOD_NOT_FOUND, "method not found"),
    }
}

async fn send_task(
    orchestrator: &Arc<TaskOrchestrator>,
    agent_id: Uuid,
    ctx: &RequestContext,
    request: &JsonRpcRequest,
    streaming: bool,
) -> Response {
    let Some(text) = extract_message_text(&request.params) else {
        return rpc_error(&request.id, INVALID_PARAMS, "message text required");
    };

    let task = match orchestrator
        .create_and_start(TaskRequest {
            agent_id,
            description: text,
            parameters: request.params.get("metadata").cloned().unwrap_or(json!({})),
            ctx: ctx.clone(),
            enable_agent_communication: true,
            requires_human_approval: false,
            budget_usd: None,
        })
        .await
    {
        Ok(task) => task,
        Err(e) => return rpc_error(&request.id, INTERNAL_ERROR, &e.to_string()),
    };

    if !streaming {
        return rpc_result(&request.id, a2a_task(&task));
    }

    // message/stream: SSE of JSON-RPC-framed task events
    let events = match orchestrator.stream_events(task.id).await {
        Ok(events) => events,
        Err(e) => return rpc_error(&request.id, INTERNAL_ERROR, &e.to_string()),
    };

    let id = request.id.clone();
    let first = rpc_frame(&id, a2a_task(&task));
    let stream = stream::once(async move { Ok::<_, std::convert::Infallible>(first) }).chain(
        events.map(move |event| {
            Ok(rpc_frame(
                &id,
                json!({
                    "kind": "status-update",
                    "taskId": event.task_id,
                    "event_type": event.event_type,
                    "data": event.data,
                    "timestamp": event.timestamp,
                }),
            ))
        }),
    );

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn rpc_frame(id: &Value, result: Value) -> Event {
    Event::default().data(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
}

async fn get_rpc_task(orchestrator: &Arc<TaskOrchestrator>, request: &JsonRpcRequest) -> Response {
    let Some(task_id) = param_task_id(&request.params) else {
        return rpc_error(&request.id, INVALID_PARAMS, "task id required");
    };

    match orchestrator.get_task(task_id).await {
        Ok(Some(task)) => rpc_result(&request.id, a2a_task(&task)),
        Ok(None) => rpc_error(&request.id, TASK_NOT_FOUND, "task not found"),
        Err(e) => rpc_error(&request.id, INTERNAL_ERROR, &e.to_string()),
    }
}

async fn cancel_rpc_task(
    orchestrator: &Arc<TaskOrchestrator>,
    request: &JsonRpcRequest,
) -> Response {
    let Some(task_id) = param_task_id(&request.params) else {
        return rpc_error(&request.id, INVALID_PARAMS, "task id required");
    };

    match orchestrator.get_task(task_id).await {
        Ok(Some(task)) => {
            if task.is_terminal() {
                return rpc_error(&request.id, TASK_NOT_CANCELLABLE, "task not cancellable");
            }
            match orchestrator.cancel_task(task_id).await {
                Ok(true) => match orchestrator.get_task(task_id).await {
                    Ok(Some(task)) => rpc_result(&request.id, a2a_task(&task)),
                    _ => rpc_error(&request.id, INTERNAL_ERROR, "cancel state unavailable"),
                },
                Ok(false) => {
                    rpc_error(&request.id, TASK_NOT_CANCELLABLE, "task not cancellable")
                }
                Err(e) => rpc_error(&request.id, INTERNAL_ERROR, &e.to_string()),
            }
        }
        Ok(None) => rpc_error(&request.id, TASK_NOT_FOUND, "task not found"),
        Err(e) => rpc_error(&request.id, INTERNAL_ERROR, &e.to_string()),
    }
}

fn param_task_id(params: &Value) -> Option<Uuid> {
    params
        .get("id")
        .or_else(|| params.get("task_id"))
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

async fn agent_card_result(
    state: &AppState,
    agent_id: Uuid,
    ctx: &RequestContext,
    request: &JsonRpcRequest,
) -> Response {
    match state.platform.directory().get(agent_id, ctx).await {
        Ok(Some(agent)) => rpc_result(&request.id, card_for(&agent.name, &agent.description, agent_id)),
        Ok(None) => rpc_error(&request.id, TASK_NOT_FOUND, "agent not found"),
        Err(e) => rpc_error(&request.id, INTERNAL_ERROR, &e.to_string()),
    }
}

/// GET /v1/agents/{agent_id}/a2a/well-known - public agent card
async fn agent_card(
    State(_state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> (StatusCode, Json<Value>) {
    // The public card carries no workspace-scoped configuration
    (
        StatusCode::OK,
        Json(card_for("agent", "", agent_id)),
    )
}

fn card_for(name: &str, description: &str, agent_id: Uuid) -> Value {
    json!({
        "name": name,
        "description": description,
        "url": format!("/v1/agents/{agent_id}/a2a/rpc"),
        "protocolVersion": "0.2.0",
        "capabilities": {
            "streaming": true,
            "pushNotifications": false,
        },
        "defaultInputModes": ["text"],
        "defaultOutputModes": ["text"],
        "skills": [],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(a2a_state(TaskStatus::Cancelled), "canceled");
        assert_eq!(a2a_state(TaskStatus::Running), "working");
        assert_eq!(a2a_state(TaskStatus::Paused), "input-required");
        assert_eq!(a2a_state(TaskStatus::Pending), "submitted");
        assert_eq!(a2a_state(TaskStatus::Submitted), "submitted");
        assert_eq!(a2a_state(TaskStatus::Completed), "completed");
        assert_eq!(a2a_state(TaskStatus::Failed), "failed");
    }

    #[test]
    fn test_extract_message_text_from_parts() {
        let params = json!({"message": {"parts": [
            {"kind": "text", "text": "first"},
            {"kind": "text", "text": "second"},
        ]}});
        assert_eq!(
            extract_message_text(&params).as_deref(),
            Some("first\nsecond")
        );
    }

    #[test]
    fn test_extract_message_text_fallbacks() {
        assert_eq!(
            extract_message_text(&json!({"message": {"content": "hi"}})).as_deref(),
            Some("hi")
        );
        assert_eq!(
            extract_message_text(&json!({"text": "hi"})).as_deref(),
            Some("hi")
        );
        assert!(extract_message_text(&json!({})).is_none());
    }

    #[test]
    fn test_param_task_id() {
        let id = Uuid::new_v4();
        assert_eq!(param_task_id(&json!({"id": id.to_string()})), Some(id));
        assert_eq!(param_task_id(&json!({"task_id": id.to_string()})), Some(id));
        assert_eq!(param_task_id(&json!({"id": "not-a-uuid"})), None);
    }
}
