// Agent task HTTP routes
//
// Task creation comes in two shapes: the SSE variant streams the task's
// event stream (replay + live, closed by a terminal event and a [DONE]
// frame), the sync variant returns the created task immediately.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use relay_core::task::{Task, TaskEvent};
use relay_core::task_service::TaskOrchestrator;
use relay_core::traits::{TaskFilter, TaskLauncher, TaskRequest};
use relay_core::{PlatformError, RequestContext};
use relay_worker::Platform;

use crate::auth::AuthVerifier;
use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub platform: Platform,
    pub auth: Arc<AuthVerifier>,
}

impl AppState {
    fn orchestrator(
        &self,
        headers: &HeaderMap,
    ) -> ApiResult<(Arc<TaskOrchestrator>, RequestContext)> {
        let ctx = self.auth.context_from_headers(headers)?;
        Ok((self.platform.task_orchestrator(ctx.clone()), ctx))
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/agents/:agent_id/tasks",
            get(list_tasks).post(create_task_stream),
        )
        .route("/v1/agents/:agent_id/tasks/sync", post(create_task_sync))
        .route(
            "/v1/agents/:agent_id/tasks/:task_id",
            get(get_task).delete(cancel_task),
        )
        .route("/v1/agents/:agent_id/tasks/:task_id/status", get(task_status))
        .route("/v1/agents/:agent_id/tasks/:task_id/pause", post(pause_task))
        .route("/v1/agents/:agent_id/tasks/:task_id/resume", post(resume_task))
        .route("/v1/agents/:agent_id/tasks/:task_id/events", get(list_events))
        .route(
            "/v1/agents/:agent_id/tasks/:task_id/events/stream",
            get(stream_events),
        )
        .with_state(state)
}

/// Request to create an agent task
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub requires_human_approval: bool,
    #[serde(default)]
    pub enable_agent_communication: bool,
    /// Cost ceiling for the run; checked between iterations, so one
    /// over-budget LLM call may complete before the workflow stops
    pub budget_usd: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListTasksParams {
    /// `me` restricts to tasks created by the caller
    pub created_by: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EventsParams {
    #[serde(default = "default_event_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_event_limit() -> i64 {
    100
}

// ============================================================================
// SSE framing
// ============================================================================

/// Payload envelope carried in the `data:` line of each frame
fn sse_envelope(event: &TaskEvent) -> Value {
    json!({
        "event_type": event.event_type,
        "event_id": event.id,
        "timestamp": event.timestamp,
        "data": event.data,
    })
}

/// `event: <type>` / `data: <envelope json>` per frame
fn sse_frame(event: &TaskEvent) -> Event {
    Event::default()
        .event(event.event_type.clone())
        .data(sse_envelope(event).to_string())
}

fn done_frame() -> Event {
    Event::default().data("[DONE]")
}

fn sse_stream(
    events: relay_core::traits::TaskEventStream,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    events
        .map(|event| Ok(sse_frame(&event)))
        .chain(stream::once(async { Ok(done_frame()) }))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/agents/{agent_id}/tasks - create a task and stream its events
#[utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/tasks",
    params(("agent_id" = Uuid, Path, description = "Agent ID")),
    request_body = CreateTaskRequest,
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 404, description = "Agent not found"),
    ),
    tag = "tasks"
)]
pub async fn create_task_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<Uuid>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (orchestrator, ctx) = state.orchestrator(&headers)?;

    let task = orchestrator
        .create_and_start(task_request(agent_id, request, &ctx))
        .await?;

    let created = TaskEvent {
        id: Uuid::new_v4(),
        task_id: task.id,
        event_type: "task.created".to_string(),
        timestamp: task.created_at,
        data: serde_json::to_value(&task).unwrap_or_default(),
        metadata: json!({}),
    };

    let events = orchestrator.stream_events(task.id).await?;
    let stream = stream::once(async move { Ok(sse_frame(&created)) }).chain(sse_stream(events));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /v1/agents/{agent_id}/tasks/sync
#[utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/tasks/sync",
    params(("agent_id" = Uuid, Path, description = "Agent ID")),
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 404, description = "Agent not found"),
    ),
    tag = "tasks"
)]
pub async fn create_task_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<Uuid>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let (orchestrator, ctx) = state.orchestrator(&headers)?;
    let task = orchestrator
        .create_and_start(task_request(agent_id, request, &ctx))
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

fn task_request(agent_id: Uuid, request: CreateTaskRequest, ctx: &RequestContext) -> TaskRequest {
    TaskRequest {
        agent_id,
        description: request.description,
        parameters: request.parameters,
        ctx: ctx.clone(),
        enable_agent_communication: request.enable_agent_communication,
        requires_human_approval: request.requires_human_approval,
        budget_usd: request.budget_usd,
    }
}

/// GET /v1/agents/{agent_id}/tasks
#[utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/tasks",
    params(
        ("agent_id" = Uuid, Path, description = "Agent ID"),
        ("created_by" = Option<String>, Query, description = "`me` for own tasks"),
        ("limit" = Option<i64>, Query, description = "Max results"),
        ("offset" = Option<i64>, Query, description = "Pagination offset"),
    ),
    responses((status = 200, description = "Tasks", body = Vec<Task>)),
    tag = "tasks"
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<Uuid>,
    Query(params): Query<ListTasksParams>,
) -> ApiResult<Json<Vec<Task>>> {
    let (orchestrator, _) = state.orchestrator(&headers)?;
    let tasks = orchestrator
        .list_tasks(TaskFilter {
            agent_id: Some(agent_id),
            creator_scoped: params.created_by.as_deref() == Some("me"),
            limit: params.limit,
            offset: params.offset,
        })
        .await?;
    Ok(Json(tasks))
}

/// GET /v1/agents/{agent_id}/tasks/{task_id}
#[utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/tasks/{task_id}",
    params(
        ("agent_id" = Uuid, Path, description = "Agent ID"),
        ("task_id" = Uuid, Path, description = "Task ID"),
    ),
    responses(
        (status = 200, description = "Task", body = Task),
        (status = 404, description = "Not found"),
    ),
    tag = "tasks"
)]
pub async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((agent_id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Task>> {
    let (orchestrator, _) = state.orchestrator(&headers)?;
    let task = require_agent_task(&orchestrator, agent_id, task_id).await?;
    Ok(Json(task))
}

/// GET /v1/agents/{agent_id}/tasks/{task_id}/status
#[utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/tasks/{task_id}/status",
    params(
        ("agent_id" = Uuid, Path, description = "Agent ID"),
        ("task_id" = Uuid, Path, description = "Task ID"),
    ),
    responses((status = 200, description = "Task status document")),
    tag = "tasks"
)]
pub async fn task_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((agent_id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    let (orchestrator, _) = state.orchestrator(&headers)?;
    let task = require_agent_task(&orchestrator, agent_id, task_id).await?;

    let execution_time = match (task.started_at, task.completed_at) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
        _ => None,
    };

    Ok(Json(json!({
        "task_id": task.id,
        "agent_id": task.agent_id,
        "status": task.status,
        "start_time": task.started_at,
        "end_time": task.completed_at,
        "execution_time": execution_time,
        "error": task.error,
        "result": task.result,
        "execution_id": task.execution_id,
    })))
}

/// DELETE /v1/agents/{agent_id}/tasks/{task_id} - cancel
#[utoipa::path(
    delete,
    path = "/v1/agents/{agent_id}/tasks/{task_id}",
    params(
        ("agent_id" = Uuid, Path, description = "Agent ID"),
        ("task_id" = Uuid, Path, description = "Task ID"),
    ),
    responses(
        (status = 200, description = "Cancelled"),
        (status = 404, description = "Not found"),
    ),
    tag = "tasks"
)]
pub async fn cancel_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((agent_id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    let (orchestrator, _) = state.orchestrator(&headers)?;
    require_agent_task(&orchestrator, agent_id, task_id).await?;

    if orchestrator.cancel_task(task_id).await? {
        Ok(Json(json!({"task_id": task_id, "status": "cancelled"})))
    } else {
        Err(ApiError(PlatformError::validation(format!(
            "task {task_id} is not cancellable"
        ))))
    }
}

/// POST /v1/agents/{agent_id}/tasks/{task_id}/pause
#[utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/tasks/{task_id}/pause",
    params(
        ("agent_id" = Uuid, Path, description = "Agent ID"),
        ("task_id" = Uuid, Path, description = "Task ID"),
    ),
    responses(
        (status = 200, description = "Paused", body = Task),
        (status = 400, description = "Not pausable"),
    ),
    tag = "tasks"
)]
pub async fn pause_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((agent_id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Task>> {
    let (orchestrator, _) = state.orchestrator(&headers)?;
    require_agent_task(&orchestrator, agent_id, task_id).await?;
    Ok(Json(orchestrator.pause_task(task_id).await?))
}

/// POST /v1/agents/{agent_id}/tasks/{task_id}/resume
#[utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/tasks/{task_id}/resume",
    params(
        ("agent_id" = Uuid, Path, description = "Agent ID"),
        ("task_id" = Uuid, Path, description = "Task ID"),
    ),
    responses(
        (status = 200, description = "Resumed", body = Task),
        (status = 400, description = "Not resumable"),
    ),
    tag = "tasks"
)]
pub async fn resume_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((agent_id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Task>> {
    let (orchestrator, _) = state.orchestrator(&headers)?;
    require_agent_task(&orchestrator, agent_id, task_id).await?;
    Ok(Json(orchestrator.resume_task(task_id).await?))
}

/// GET /v1/agents/{agent_id}/tasks/{task_id}/events
#[utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/tasks/{task_id}/events",
    params(
        ("agent_id" = Uuid, Path, description = "Agent ID"),
        ("task_id" = Uuid, Path, description = "Task ID"),
        ("limit" = Option<i64>, Query, description = "Max events"),
        ("offset" = Option<i64>, Query, description = "Pagination offset"),
    ),
    responses((status = 200, description = "Persisted events")),
    tag = "tasks"
)]
pub async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((agent_id, task_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<EventsParams>,
) -> ApiResult<Json<Value>> {
    let (orchestrator, _) = state.orchestrator(&headers)?;
    require_agent_task(&orchestrator, agent_id, task_id).await?;

    let events = orchestrator
        .list_events(task_id, params.limit, params.offset)
        .await?;
    Ok(Json(json!({
        "task_id": task_id,
        "count": events.len(),
        "limit": params.limit,
        "offset": params.offset,
        "events": events,
    })))
}

/// GET /v1/agents/{agent_id}/tasks/{task_id}/events/stream
#[utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/tasks/{task_id}/events/stream",
    params(
        ("agent_id" = Uuid, Path, description = "Agent ID"),
        ("task_id" = Uuid, Path, description = "Task ID"),
    ),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 404, description = "Not found"),
    ),
    tag = "tasks"
)]
pub async fn stream_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((agent_id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (orchestrator, _) = state.orchestrator(&headers)?;
    require_agent_task(&orchestrator, agent_id, task_id).await?;

    let events = orchestrator.stream_events(task_id).await?;
    Ok(Sse::new(sse_stream(events)).keep_alive(KeepAlive::default()))
}

/// Scope check: the task must exist in this workspace AND belong to the
/// agent in the path.
async fn require_agent_task(
    orchestrator: &TaskOrchestrator,
    agent_id: Uuid,
    task_id: Uuid,
) -> Result<Task, PlatformError> {
    let task = orchestrator
        .get_task(task_id)
        .await?
        .ok_or_else(|| PlatformError::not_found(format!("task {task_id}")))?;
    if task.agent_id != agent_id {
        return Err(PlatformError::not_found(format!("task {task_id}")));
    }
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_sse_envelope_shape() {
        let event = TaskEvent {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            event_type: "workflow.iteration_started".to_string(),
            timestamp: Utc::now(),
            data: json!({"iteration": 1}),
            metadata: json!({}),
        };

        let envelope = sse_envelope(&event);
        assert_eq!(envelope["event_type"], "workflow.iteration_started");
        assert_eq!(envelope["event_id"], json!(event.id));
        assert_eq!(envelope["data"]["iteration"], 1);
        assert!(envelope["timestamp"].is_string());
    }
}
