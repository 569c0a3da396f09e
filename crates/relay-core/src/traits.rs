// Seams between the policy layer, persistence, and the workflow engine
//
// Decision: services and workflows depend on these traits, never on concrete
// stores, so in-memory implementations can stand in for Postgres and the
// engine in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::Result;
use crate::events::DomainEvent;
use crate::task::{Task, TaskEvent, TaskStatus};
use crate::trigger::{
    ExecutionStatus, Trigger, TriggerCreate, TriggerExecution, TriggerKind, TriggerUpdate,
};

// ============================================================================
// Trigger store
// ============================================================================

/// Filters for listing triggers
#[derive(Debug, Clone, Default)]
pub struct TriggerFilter {
    pub agent_id: Option<Uuid>,
    pub kind: Option<TriggerKind>,
    pub active_only: bool,
    /// Restrict to rows created by the bound context's user
    pub creator_scoped: bool,
    pub limit: Option<i64>,
}

/// Filters for the paginated execution listing
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub status: Option<ExecutionStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub page: i64,
    pub page_size: i64,
}

/// One page of execution records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExecutionPage {
    pub executions: Vec<TriggerExecution>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_next: bool,
}

/// Aggregated execution analytics over a trailing window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExecutionMetrics {
    pub trigger_id: Uuid,
    pub window_hours: i64,
    pub total_executions: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    pub timeout_executions: i64,
    pub success_rate: f64,
    pub avg_execution_time_ms: Option<f64>,
    pub min_execution_time_ms: Option<i64>,
    pub max_execution_time_ms: Option<i64>,
}

/// One bucket of the execution timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TimelineBucket {
    pub bucket_start: DateTime<Utc>,
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
}

/// Persistence for triggers and their execution records.
///
/// Implementations are bound to a workspace context: reads filter by the
/// bound workspace, creates stamp workspace/created_by, and mutations of
/// foreign rows report NotFound.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn create(&self, input: TriggerCreate) -> Result<Trigger>;
    async fn get(&self, id: Uuid) -> Result<Option<Trigger>>;
    async fn update(&self, id: Uuid, update: TriggerUpdate) -> Result<Trigger>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
    async fn list(&self, filter: TriggerFilter) -> Result<Vec<Trigger>>;

    /// First trigger bound to a webhook id within this workspace; the
    /// public ingest path uses the unscoped multi-trigger lookup instead
    async fn get_by_webhook_id(&self, webhook_id: &str) -> Result<Option<Trigger>>;

    /// Cron triggers whose next_run_time is due (diagnostic only; the engine
    /// drives scheduling)
    async fn list_cron_due(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>>;

    /// Atomic counter update after an execution
    async fn update_execution_tracking(
        &self,
        id: Uuid,
        last_execution_at: DateTime<Utc>,
        consecutive_failures: i32,
    ) -> Result<()>;

    async fn record_execution(&self, execution: TriggerExecution) -> Result<TriggerExecution>;
    async fn list_executions(&self, trigger_id: Uuid, filter: ExecutionFilter)
        -> Result<ExecutionPage>;
    async fn execution_metrics(&self, trigger_id: Uuid, hours: i64) -> Result<ExecutionMetrics>;
    async fn execution_timeline(
        &self,
        trigger_id: Uuid,
        hours: i64,
        bucket_minutes: i64,
    ) -> Result<Vec<TimelineBucket>>;
}

// ============================================================================
// Task store
// ============================================================================

/// Input for persisting a new task
#[derive(Debug, Clone)]
pub struct TaskCreate {
    pub agent_id: Uuid,
    pub description: String,
    pub parameters: Value,
    pub status: TaskStatus,
    pub metadata: Value,
}

/// Partial task update; `None` leaves the field untouched
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_id: Option<String>,
}

/// Filters for listing tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub agent_id: Option<Uuid>,
    pub creator_scoped: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Workspace-scoped task persistence
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, input: TaskCreate) -> Result<Task>;
    async fn get(&self, id: Uuid) -> Result<Option<Task>>;
    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task>;
    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

// ============================================================================
// Task event log
// ============================================================================

/// Append-only per-task event log
#[async_trait]
pub trait TaskEventStore: Send + Sync {
    /// Idempotent append keyed on the event id; returns false on duplicate
    async fn append(&self, event: TaskEvent) -> Result<bool>;

    /// All events for a task in ascending timestamp order
    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<TaskEvent>>;

    /// Paginated slice in ascending timestamp order
    async fn list_page(&self, task_id: Uuid, limit: i64, offset: i64) -> Result<Vec<TaskEvent>>;
}

// ============================================================================
// Agent directory (agent CRUD is out of scope; this is the read interface)
// ============================================================================

/// The slice of agent configuration the platform needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: Uuid,
    pub name: String,
    pub model_id: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools_config: Value,
    #[serde(default)]
    pub planning: bool,
}

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn get(&self, agent_id: Uuid, ctx: &RequestContext) -> Result<Option<AgentSummary>>;

    async fn exists(&self, agent_id: Uuid, ctx: &RequestContext) -> Result<bool> {
        Ok(self.get(agent_id, ctx).await?.is_some())
    }
}

// ============================================================================
// Event publishing
// ============================================================================

/// Fan-out of domain events to the broker and the durable per-task log
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    async fn publish_batch(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Live+replay event subscription for one task; the event bus implements
/// this over its durable log and broadcast channel
pub type TaskEventStream = futures::stream::BoxStream<'static, TaskEvent>;

#[async_trait]
pub trait EventStreamer: Send + Sync {
    /// Replay persisted events then continue live; ends after the first
    /// terminal event
    async fn stream_task_events(&self, task_id: Uuid) -> Result<TaskEventStream>;
}

// ============================================================================
// Schedule manager (engine schedule API adapter)
// ============================================================================

/// Engine schedule id for a cron trigger
pub fn schedule_id(trigger_id: Uuid) -> String {
    format!("cron-trigger-{trigger_id}")
}

/// Observed state of an engine schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ScheduleInfo {
    pub schedule_id: String,
    pub cron_expression: String,
    pub timezone: String,
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fire_time: Option<DateTime<Utc>>,
}

/// Adapter over the workflow engine's schedule API (`cron-trigger-{id}`)
#[async_trait]
pub trait ScheduleManager: Send + Sync {
    async fn create(&self, trigger_id: Uuid, cron_expression: &str, timezone: &str) -> Result<()>;

    /// Idempotent edit of the existing schedule
    async fn update(&self, trigger_id: Uuid, cron_expression: &str, timezone: &str) -> Result<()>;

    /// Pausing does not cancel an in-flight execution
    async fn pause(&self, trigger_id: Uuid) -> Result<()>;
    async fn unpause(&self, trigger_id: Uuid) -> Result<()>;

    /// Best-effort; a missing schedule is treated as success
    async fn delete(&self, trigger_id: Uuid) -> Result<()>;

    async fn info(&self, trigger_id: Uuid) -> Result<Option<ScheduleInfo>>;

    /// Trigger ids with a live schedule, for the reconciler sweep
    async fn list_scheduled(&self) -> Result<Vec<Uuid>>;
}

// ============================================================================
// Trigger execution / task launching seams
// ============================================================================

/// Invoked by cron firings and the webhook router; implemented by the
/// trigger service
#[async_trait]
pub trait TriggerExecutor: Send + Sync {
    async fn execute_trigger(
        &self,
        trigger_id: Uuid,
        event_data: Value,
    ) -> Result<TriggerExecution>;
}

/// Request to create and start an agent task
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub agent_id: Uuid,
    pub description: String,
    pub parameters: Value,
    pub ctx: RequestContext,
    pub enable_agent_communication: bool,
    pub requires_human_approval: bool,
    pub budget_usd: Option<f64>,
}

/// The seam the trigger service uses to create tasks; implemented by the
/// task orchestrator
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn create_and_start(&self, request: TaskRequest) -> Result<Task>;
}
