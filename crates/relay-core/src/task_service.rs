// Task orchestrator - the user-facing task API
//
// Creates tasks, starts workflow executions on the engine, exposes
// status/cancel/pause/resume, and serves the replay+live event stream.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{PlatformError, Result};
use crate::task::{Task, TaskEvent, TaskStatus};
use crate::traits::{
    AgentDirectory, EventStreamer, TaskCreate, TaskEventStream, TaskEventStore, TaskFilter,
    TaskLauncher, TaskPatch, TaskRequest, TaskStore,
};
use crate::workflow::{
    AgentExecutionRequest, ExecutionPhase, StateSnapshot, WorkflowRunner, WorkflowSignal,
};

/// Limits applied to workflow runs started by this orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorDefaults {
    pub default_budget_usd: f64,
    pub max_iterations: u32,
}

impl Default for OrchestratorDefaults {
    fn default() -> Self {
        Self {
            default_budget_usd: crate::budget::DEFAULT_BUDGET_USD,
            max_iterations: 50,
        }
    }
}

pub struct TaskOrchestrator {
    tasks: Arc<dyn TaskStore>,
    events: Arc<dyn TaskEventStore>,
    directory: Arc<dyn AgentDirectory>,
    runner: Arc<dyn WorkflowRunner>,
    streamer: Arc<dyn EventStreamer>,
    defaults: OrchestratorDefaults,
    ctx: RequestContext,
}

impl TaskOrchestrator {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        events: Arc<dyn TaskEventStore>,
        directory: Arc<dyn AgentDirectory>,
        runner: Arc<dyn WorkflowRunner>,
        streamer: Arc<dyn EventStreamer>,
        defaults: OrchestratorDefaults,
        ctx: RequestContext,
    ) -> Self {
        Self {
            tasks,
            events,
            directory,
            runner,
            streamer,
            defaults,
            ctx,
        }
    }

    /// Read a task, overlaying the engine's live view of a running execution
    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        let Some(mut task) = self.tasks.get(task_id).await? else {
            return Ok(None);
        };

        if !task.is_terminal() {
            if let Some(execution_id) = task.execution_id.clone() {
                if let Some(snapshot) = self.runner.query_state(&execution_id).await? {
                    task.status = overlay_status(task.status, &snapshot);
                }
            }
        }

        Ok(Some(task))
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        self.tasks.list(filter).await
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> Result<bool> {
        let Some(task) = self.tasks.get(task_id).await? else {
            return Ok(false);
        };
        if task.is_terminal() {
            return Ok(false);
        }

        if let Some(execution_id) = &task.execution_id {
            if let Err(e) = self.runner.cancel(execution_id).await {
                error!(task_id = %task_id, error = %e, "engine cancel failed");
            }
        }

        self.tasks
            .update(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Cancelled),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        info!(task_id = %task_id, "task cancelled");
        Ok(true)
    }

    pub async fn pause_task(&self, task_id: Uuid) -> Result<Task> {
        let task = self.require_signalable(task_id).await?;

        self.runner
            .signal(
                task.execution_id.as_deref().unwrap_or_default(),
                WorkflowSignal::Pause { reason: None },
            )
            .await?;

        self.tasks
            .update(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Paused),
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn resume_task(&self, task_id: Uuid) -> Result<Task> {
        let task = self.require_signalable(task_id).await?;

        self.runner
            .signal(
                task.execution_id.as_deref().unwrap_or_default(),
                WorkflowSignal::Resume { reason: None },
            )
            .await?;

        self.tasks
            .update(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Running),
                    ..Default::default()
                },
            )
            .await
    }

    /// Paginated slice of the durable event log
    pub async fn list_events(
        &self,
        task_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskEvent>> {
        self.require_task(task_id).await?;
        self.events.list_page(task_id, limit, offset).await
    }

    /// Replay persisted events, then continue live until a terminal event
    pub async fn stream_events(&self, task_id: Uuid) -> Result<TaskEventStream> {
        self.require_task(task_id).await?;
        self.streamer.stream_task_events(task_id).await
    }

    pub async fn query_state(&self, task_id: Uuid) -> Result<Option<StateSnapshot>> {
        let task = self.require_task(task_id).await?;
        let Some(execution_id) = &task.execution_id else {
            return Ok(None);
        };
        self.runner.query_state(execution_id).await
    }

    async fn require_task(&self, task_id: Uuid) -> Result<Task> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("task {task_id}")))
    }

    async fn require_signalable(&self, task_id: Uuid) -> Result<Task> {
        let task = self.require_task(task_id).await?;
        if task.is_terminal() {
            return Err(PlatformError::validation(format!(
                "task {task_id} is {} and cannot be signalled",
                task.status
            )));
        }
        if task.execution_id.is_none() {
            return Err(PlatformError::validation(format!(
                "task {task_id} has no execution to signal"
            )));
        }
        Ok(task)
    }
}

fn overlay_status(persisted: TaskStatus, snapshot: &StateSnapshot) -> TaskStatus {
    if snapshot.paused {
        return TaskStatus::Paused;
    }
    match snapshot.status {
        ExecutionPhase::Initializing | ExecutionPhase::Executing => TaskStatus::Running,
        ExecutionPhase::WaitingForApproval => TaskStatus::Paused,
        ExecutionPhase::Completed => TaskStatus::Completed,
        ExecutionPhase::Failed => TaskStatus::Failed,
        ExecutionPhase::Cancelled => TaskStatus::Cancelled,
    }
    .max_specificity(persisted)
}

trait MaxSpecificity {
    fn max_specificity(self, persisted: TaskStatus) -> TaskStatus;
}

impl MaxSpecificity for TaskStatus {
    /// A terminal persisted status wins over a transient engine view
    fn max_specificity(self, persisted: TaskStatus) -> TaskStatus {
        if persisted.is_terminal() {
            persisted
        } else {
            self
        }
    }
}

#[async_trait]
impl TaskLauncher for TaskOrchestrator {
    async fn create_and_start(&self, request: TaskRequest) -> Result<Task> {
        let agent = self
            .directory
            .get(request.agent_id, &request.ctx)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("agent {}", request.agent_id)))?;

        let task = self
            .tasks
            .create(TaskCreate {
                agent_id: request.agent_id,
                description: request.description.clone(),
                parameters: request.parameters.clone(),
                status: TaskStatus::Pending,
                metadata: json!({
                    "agent_name": agent.name,
                    "requires_human_approval": request.requires_human_approval,
                    "enable_agent_communication": request.enable_agent_communication,
                }),
            })
            .await?;

        let workflow_request = AgentExecutionRequest {
            task_id: task.id,
            agent_id: request.agent_id,
            user_id: request.ctx.user_id.clone(),
            workspace_id: request.ctx.workspace_id.clone(),
            task_query: request.description,
            task_parameters: request.parameters,
            timeout_seconds: None,
            max_reasoning_iterations: self.defaults.max_iterations,
            enable_agent_communication: request.enable_agent_communication,
            requires_human_approval: request.requires_human_approval,
            budget_usd: Some(
                request
                    .budget_usd
                    .unwrap_or(self.defaults.default_budget_usd),
            ),
            workflow_metadata: json!({"source": "task_orchestrator"}),
        };

        match self.runner.start(workflow_request).await {
            Ok(execution_id) => {
                let task = self
                    .tasks
                    .update(
                        task.id,
                        TaskPatch {
                            status: Some(TaskStatus::Running),
                            started_at: Some(Utc::now()),
                            execution_id: Some(execution_id),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(task_id = %task.id, "workflow started for task");
                Ok(task)
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "workflow start failed");
                self.tasks
                    .update(
                        task.id,
                        TaskPatch {
                            status: Some(TaskStatus::Failed),
                            error: Some(e.to_string()),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
                Err(PlatformError::dependency(format!(
                    "workflow start failed: {e}"
                )))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
