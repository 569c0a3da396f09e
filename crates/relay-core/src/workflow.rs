// Workflow engine contract
//
// The durable-execution engine is an external collaborator. The platform
// consumes its contract - start/cancel, signals, queries - through the
// WorkflowRunner trait; the worker crate ships the default in-process
// implementation and a remote engine client implements the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::events::DomainEvent;

/// Input to an agent execution workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionRequest {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub user_id: String,
    pub workspace_id: String,
    pub task_query: String,
    #[serde(default)]
    pub task_parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    pub max_reasoning_iterations: u32,
    #[serde(default)]
    pub enable_agent_communication: bool,
    #[serde(default)]
    pub requires_human_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
    #[serde(default)]
    pub workflow_metadata: Value,
}

impl AgentExecutionRequest {
    /// Engine workflow id for a task
    pub fn execution_id(&self) -> String {
        format!("task-{}", self.task_id)
    }
}

/// Result returned by a finished agent execution workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub task_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
    pub reasoning_iterations_used: u32,
    pub total_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

/// Async, non-returning signals a running workflow accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "lowercase")]
pub enum WorkflowSignal {
    Pause {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Resume {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Cancel,
}

/// Workflow lifecycle phase, reported by the `get_current_state` query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Initializing,
    Executing,
    WaitingForApproval,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Initializing => "initializing",
            ExecutionPhase::Executing => "executing",
            ExecutionPhase::WaitingForApproval => "waiting_for_approval",
            ExecutionPhase::Completed => "completed",
            ExecutionPhase::Failed => "failed",
            ExecutionPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionPhase::Completed | ExecutionPhase::Failed | ExecutionPhase::Cancelled
        )
    }
}

/// Side-effect-free view of a running workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub status: ExecutionPhase,
    pub current_iteration: u32,
    pub success: bool,
    pub cost: f64,
    pub budget_remaining: f64,
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
}

/// The engine surface the orchestrator consumes
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Start the workflow; returns the engine execution id (`task-{task_id}`)
    async fn start(&self, request: AgentExecutionRequest) -> Result<String>;

    /// Propagate cancellation; in-flight activities unwind promptly
    async fn cancel(&self, execution_id: &str) -> Result<bool>;

    /// Deliver a pause/resume signal
    async fn signal(&self, execution_id: &str, signal: WorkflowSignal) -> Result<bool>;

    /// `get_current_state` query; None once the run is gone
    async fn query_state(&self, execution_id: &str) -> Result<Option<StateSnapshot>>;

    /// `get_latest_events` query
    async fn latest_events(&self, execution_id: &str, limit: usize) -> Result<Vec<DomainEvent>>;

    async fn is_running(&self, execution_id: &str) -> bool;
}
