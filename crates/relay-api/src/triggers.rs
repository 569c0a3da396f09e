// Trigger management HTTP routes

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use relay_core::traits::{ExecutionFilter, TriggerFilter};
use relay_core::trigger::{Trigger, TriggerCreate, TriggerKind, TriggerUpdate};
use relay_core::trigger_service::TriggerService;
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
    fn service(&self, headers: &HeaderMap) -> ApiResult<(Arc<TriggerService>, RequestContext)> {
        let ctx = self.auth.context_from_headers(headers)?;
        Ok((self.platform.trigger_service(ctx.clone()), ctx))
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/triggers", get(list_triggers).post(create_trigger))
        .route("/v1/triggers/health", get(triggers_health))
        .route(
            "/v1/triggers/:trigger_id",
            get(get_trigger).put(update_trigger).delete(delete_trigger),
        )
        .route("/v1/triggers/:trigger_id/enable", post(enable_trigger))
        .route("/v1/triggers/:trigger_id/disable", post(disable_trigger))
        .route("/v1/triggers/:trigger_id/executions", get(list_executions))
        .route("/v1/triggers/:trigger_id/status", get(trigger_status))
        .route("/v1/triggers/:trigger_id/metrics", get(trigger_metrics))
        .route("/v1/triggers/:trigger_id/timeline", get(trigger_timeline))
        .with_state(state)
}

/// Query parameters for listing triggers
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListTriggersParams {
    pub agent_id: Option<Uuid>,
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub active_only: bool,
    /// `me` restricts to triggers created by the caller
    pub created_by: Option<String>,
    pub limit: Option<i64>,
}

/// POST /v1/triggers
#[utoipa::path(
    post,
    path = "/v1/triggers",
    request_body = TriggerCreate,
    responses(
        (status = 201, description = "Trigger created", body = Trigger),
        (status = 400, description = "Validation failed"),
    ),
    tag = "triggers"
)]
pub async fn create_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<TriggerCreate>,
) -> ApiResult<(StatusCode, Json<Trigger>)> {
    let (service, _) = state.service(&headers)?;
    let trigger = service.create_trigger(input).await?;
    Ok((StatusCode::CREATED, Json(trigger)))
}

/// GET /v1/triggers
#[utoipa::path(
    get,
    path = "/v1/triggers",
    params(
        ("agent_id" = Option<Uuid>, Query, description = "Filter by agent"),
        ("trigger_type" = Option<String>, Query, description = "cron or webhook"),
        ("active_only" = Option<bool>, Query, description = "Only active triggers"),
        ("created_by" = Option<String>, Query, description = "`me` for own triggers"),
        ("limit" = Option<i64>, Query, description = "Max results"),
    ),
    responses((status = 200, description = "Triggers", body = Vec<Trigger>)),
    tag = "triggers"
)]
pub async fn list_triggers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListTriggersParams>,
) -> ApiResult<Json<Vec<Trigger>>> {
    let (service, _) = state.service(&headers)?;

    let kind = params
        .trigger_type
        .as_deref()
        .map(|t| t.parse::<TriggerKind>())
        .transpose()?;

    let triggers = service
        .list_triggers(TriggerFilter {
            agent_id: params.agent_id,
            kind,
            active_only: params.active_only,
            creator_scoped: params.created_by.as_deref() == Some("me"),
            limit: params.limit,
        })
        .await?;
    Ok(Json(triggers))
}

/// GET /v1/triggers/{trigger_id}
#[utoipa::path(
    get,
    path = "/v1/triggers/{trigger_id}",
    params(("trigger_id" = Uuid, Path, description = "Trigger ID")),
    responses(
        (status = 200, description = "Trigger", body = Trigger),
        (status = 404, description = "Not found"),
    ),
    tag = "triggers"
)]
pub async fn get_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
) -> ApiResult<Json<Trigger>> {
    let (service, _) = state.service(&headers)?;
    let trigger = service
        .get_trigger(trigger_id)
        .await?
        .ok_or_else(|| PlatformError::not_found(format!("trigger {trigger_id}")))?;
    Ok(Json(trigger))
}

/// PUT /v1/triggers/{trigger_id}
#[utoipa::path(
    put,
    path = "/v1/triggers/{trigger_id}",
    params(("trigger_id" = Uuid, Path, description = "Trigger ID")),
    request_body = TriggerUpdate,
    responses(
        (status = 200, description = "Updated", body = Trigger),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Not found"),
    ),
    tag = "triggers"
)]
pub async fn update_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
    Json(update): Json<TriggerUpdate>,
) -> ApiResult<Json<Trigger>> {
    let (service, _) = state.service(&headers)?;
    let trigger = service.update_trigger(trigger_id, update).await?;
    Ok(Json(trigger))
}

/// DELETE /v1/triggers/{trigger_id}
#[utoipa::path(
    delete,
    path = "/v1/triggers/{trigger_id}",
    params(("trigger_id" = Uuid, Path, description = "Trigger ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
    ),
    tag = "triggers"
)]
pub async fn delete_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let (service, _) = state.service(&headers)?;
    if service.delete_trigger(trigger_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(PlatformError::not_found(format!(
            "trigger {trigger_id}"
        ))))
    }
}

/// POST /v1/triggers/{trigger_id}/enable
#[utoipa::path(
    post,
    path = "/v1/triggers/{trigger_id}/enable",
    params(("trigger_id" = Uuid, Path, description = "Trigger ID")),
    responses((status = 200, description = "Enabled")),
    tag = "triggers"
)]
pub async fn enable_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let (service, _) = state.service(&headers)?;
    let trigger = service.enable_trigger(trigger_id).await?;
    Ok(Json(json!({"trigger_id": trigger.id, "is_active": true})))
}

/// POST /v1/triggers/{trigger_id}/disable
#[utoipa::path(
    post,
    path = "/v1/triggers/{trigger_id}/disable",
    params(("trigger_id" = Uuid, Path, description = "Trigger ID")),
    responses((status = 200, description = "Disabled")),
    tag = "triggers"
)]
pub async fn disable_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let (service, _) = state.service(&headers)?;
    let (trigger, _) = service.disable_trigger(trigger_id).await?;
    Ok(Json(json!({"trigger_id": trigger.id, "is_active": false})))
}

/// Query parameters for the execution history listing
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExecutionsParams {
    pub status: Option<String>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

/// GET /v1/triggers/{trigger_id}/executions
#[utoipa::path(
    get,
    path = "/v1/triggers/{trigger_id}/executions",
    params(
        ("trigger_id" = Uuid, Path, description = "Trigger ID"),
        ("status" = Option<String>, Query, description = "Filter by execution status"),
        ("page" = Option<i64>, Query, description = "Page number (1-based)"),
        ("page_size" = Option<i64>, Query, description = "Page size"),
    ),
    responses((status = 200, description = "Execution page")),
    tag = "triggers"
)]
pub async fn list_executions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
    Query(params): Query<ExecutionsParams>,
) -> ApiResult<Json<Value>> {
    let (service, _) = state.service(&headers)?;

    let status = params
        .status
        .as_deref()
        .map(|s| s.parse::<relay_core::ExecutionStatus>())
        .transpose()?;

    let page = service
        .execution_history(
            trigger_id,
            ExecutionFilter {
                status,
                start_time: params.start_time,
                end_time: params.end_time,
                page: params.page,
                page_size: params.page_size,
            },
        )
        .await?;

    Ok(Json(json!({
        "executions": page.executions,
        "total": page.total,
        "page": page.page,
        "page_size": page.page_size,
        "has_next": page.has_next,
    })))
}

/// GET /v1/triggers/{trigger_id}/status
#[utoipa::path(
    get,
    path = "/v1/triggers/{trigger_id}/status",
    params(("trigger_id" = Uuid, Path, description = "Trigger ID")),
    responses((status = 200, description = "Safety status")),
    tag = "triggers"
)]
pub async fn trigger_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let (service, _) = state.service(&headers)?;
    let status = service.safety_status(trigger_id).await?;
    Ok(Json(serde_json::to_value(status).unwrap_or_default()))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MetricsParams {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

/// GET /v1/triggers/{trigger_id}/metrics
#[utoipa::path(
    get,
    path = "/v1/triggers/{trigger_id}/metrics",
    params(
        ("trigger_id" = Uuid, Path, description = "Trigger ID"),
        ("hours" = Option<i64>, Query, description = "Trailing window, 1..=168"),
    ),
    responses((status = 200, description = "Execution metrics")),
    tag = "triggers"
)]
pub async fn trigger_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
    Query(params): Query<MetricsParams>,
) -> ApiResult<Json<Value>> {
    if !(1..=168).contains(&params.hours) {
        return Err(ApiError(PlatformError::validation(
            "hours must be between 1 and 168",
        )));
    }
    let (service, _) = state.service(&headers)?;
    let metrics = service.execution_metrics(trigger_id, params.hours).await?;
    Ok(Json(serde_json::to_value(metrics).unwrap_or_default()))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TimelineParams {
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default = "default_bucket_minutes")]
    pub bucket_size_minutes: i64,
}

fn default_bucket_minutes() -> i64 {
    60
}

/// GET /v1/triggers/{trigger_id}/timeline
#[utoipa::path(
    get,
    path = "/v1/triggers/{trigger_id}/timeline",
    params(
        ("trigger_id" = Uuid, Path, description = "Trigger ID"),
        ("hours" = Option<i64>, Query, description = "Trailing window, 1..=168"),
        ("bucket_size_minutes" = Option<i64>, Query, description = "Bucket width, 5..=1440"),
    ),
    responses((status = 200, description = "Execution timeline")),
    tag = "triggers"
)]
pub async fn trigger_timeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trigger_id): Path<Uuid>,
    Query(params): Query<TimelineParams>,
) -> ApiResult<Json<Value>> {
    if !(1..=168).contains(&params.hours) {
        return Err(ApiError(PlatformError::validation(
            "hours must be between 1 and 168",
        )));
    }
    if !(5..=1440).contains(&params.bucket_size_minutes) {
        return Err(ApiError(PlatformError::validation(
            "bucket_size_minutes must be between 5 and 1440",
        )));
    }
    let (service, _) = state.service(&headers)?;
    let buckets = service
        .execution_timeline(trigger_id, params.hours, params.bucket_size_minutes)
        .await?;
    Ok(Json(json!({
        "trigger_id": trigger_id,
        "hours": params.hours,
        "bucket_size_minutes": params.bucket_size_minutes,
        "timeline": buckets,
    })))
}

/// GET /v1/triggers/health
#[utoipa::path(
    get,
    path = "/v1/triggers/health",
    responses((status = 200, description = "Trigger subsystem health")),
    tag = "triggers"
)]
pub async fn triggers_health(State(state): State<AppState>) -> Json<Value> {
    let db_healthy = state.platform.db().ping().await.is_ok();
    let schedules = state
        .platform
        .schedules()
        .list_scheduled()
        .await
        .map(|s| s.len())
        .ok();

    let status = if db_healthy && schedules.is_some() {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "components": {
            "database": if db_healthy { "up" } else { "down" },
            "schedule_manager": if schedules.is_some() { "up" } else { "down" },
        },
        "active_schedules": schedules,
    }))
}
