// In-process workflow runner
//
// Default implementation of the engine contract: executes agent workflows as
// Tokio tasks. Fast, but not durable across process restarts - a remote
// engine client implements the same WorkflowRunner trait for production
// durability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};

use relay_core::error::{PlatformError, Result};
use relay_core::events::DomainEvent;
use relay_core::task::TaskStatus;
use relay_core::traits::{TaskPatch, TaskStore};
use relay_core::workflow::{
    AgentExecutionRequest, AgentExecutionResult, StateSnapshot, WorkflowRunner, WorkflowSignal,
};
use relay_core::RequestContext;
use relay_storage::{Database, PgTaskStore};

use crate::activities::Activities;
use crate::workflow::{AgentExecutionWorkflow, WorkflowHandle};

struct RunEntry {
    handle: WorkflowHandle,
    /// None only in the window between registration and spawn
    join: Option<tokio::task::JoinHandle<()>>,
}

pub struct InProcessRunner {
    activities: Arc<dyn Activities>,
    db: Database,
    runs: Arc<RwLock<HashMap<String, RunEntry>>>,
    permits: Arc<Semaphore>,
}

impl InProcessRunner {
    pub fn new(activities: Arc<dyn Activities>, db: Database, max_concurrent: usize) -> Self {
        Self {
            activities,
            db,
            runs: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn active_count(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn shutdown(&self) {
        let mut runs = self.runs.write().await;
        for (execution_id, entry) in runs.drain() {
            info!(execution_id = %execution_id, "aborting workflow on shutdown");
            if let Some(join) = entry.join {
                join.abort();
            }
        }
    }

    /// Persist the terminal outcome onto the task row. The workflow result is
    /// merged into the row - never blindly overwritten - via a partial patch.
    async fn finalize_task(db: &Database, request: &AgentExecutionRequest, result: &AgentExecutionResult) {
        let ctx = match RequestContext::new(
            request.workspace_id.clone(),
            request.user_id.clone(),
        ) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(task_id = %request.task_id, error = %e, "task finalization skipped");
                return;
            }
        };
        let store = PgTaskStore::new(db.clone(), ctx);

        let status = if result.success {
            TaskStatus::Completed
        } else if result.error_type.as_deref() == Some("cancelled") {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };

        let patch = TaskPatch {
            status: Some(status),
            result: Some(json!({
                "success": result.success,
                "final_response": result.final_response,
                "reasoning_iterations_used": result.reasoning_iterations_used,
                "total_cost_usd": result.total_cost_usd,
            })),
            error: result.error.clone(),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };

        if let Err(e) = store.update(request.task_id, patch).await {
            warn!(task_id = %request.task_id, error = %e, "task finalization failed");
        }
    }
}

#[async_trait]
impl WorkflowRunner for InProcessRunner {
    async fn start(&self, request: AgentExecutionRequest) -> Result<String> {
        let execution_id = request.execution_id();

        if self.runs.read().await.contains_key(&execution_id) {
            return Err(PlatformError::validation(format!(
                "workflow {execution_id} already running"
            )));
        }

        let (workflow, handle) = AgentExecutionWorkflow::new(request.clone(), self.activities.clone());

        // Register before spawning so a fast-finishing workflow cannot race
        // its own cleanup
        self.runs.write().await.insert(
            execution_id.clone(),
            RunEntry {
                handle: handle.clone(),
                join: None,
            },
        );

        let permits = self.permits.clone();
        let runs = self.runs.clone();
        let db = self.db.clone();
        let cleanup_id = execution_id.clone();
        let query_handle = handle;

        let join = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            // The whole run is bounded by the request's timeout when set
            let result = match request.timeout_seconds {
                Some(secs) => {
                    match tokio::time::timeout(Duration::from_secs(secs), workflow.run()).await {
                        Ok(result) => result,
                        Err(_) => {
                            let snapshot = query_handle.current_state().await;
                            AgentExecutionResult {
                                task_id: request.task_id,
                                success: false,
                                final_response: None,
                                reasoning_iterations_used: snapshot.current_iteration,
                                total_cost_usd: snapshot.cost,
                                error: Some(format!("workflow exceeded {secs}s deadline")),
                                error_type: Some("timeout".to_string()),
                            }
                        }
                    }
                }
                None => workflow.run().await,
            };
            Self::finalize_task(&db, &request, &result).await;

            info!(
                execution_id = %cleanup_id,
                success = result.success,
                iterations = result.reasoning_iterations_used,
                "workflow finished"
            );
            runs.write().await.remove(&cleanup_id);
        });

        if let Some(entry) = self.runs.write().await.get_mut(&execution_id) {
            entry.join = Some(join);
        }

        Ok(execution_id)
    }

    async fn cancel(&self, execution_id: &str) -> Result<bool> {
        let runs = self.runs.read().await;
        match runs.get(execution_id) {
            Some(entry) => {
                info!(execution_id = %execution_id, "cancelling workflow");
                Ok(entry.handle.signal(WorkflowSignal::Cancel))
            }
            None => Ok(false),
        }
    }

    async fn signal(&self, execution_id: &str, signal: WorkflowSignal) -> Result<bool> {
        let runs = self.runs.read().await;
        match runs.get(execution_id) {
            Some(entry) => Ok(entry.handle.signal(signal)),
            None => Err(PlatformError::not_found(format!(
                "workflow {execution_id}"
            ))),
        }
    }

    async fn query_state(&self, execution_id: &str) -> Result<Option<StateSnapshot>> {
        let runs = self.runs.read().await;
        match runs.get(execution_id) {
            Some(entry) => Ok(Some(entry.handle.current_state().await)),
            None => Ok(None),
        }
    }

    async fn latest_events(&self, execution_id: &str, limit: usize) -> Result<Vec<DomainEvent>> {
        let runs = self.runs.read().await;
        match runs.get(execution_id) {
            Some(entry) => Ok(entry.handle.latest_events(limit).await),
            None => Ok(Vec::new()),
        }
    }

    async fn is_running(&self, execution_id: &str) -> bool {
        self.runs.read().await.contains_key(execution_id)
    }
}
