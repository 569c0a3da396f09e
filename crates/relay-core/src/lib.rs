// Relay core abstractions
//
// Domain model, collaborator contracts, and the trait seams shared by the
// API and worker crates. This crate has no database or HTTP dependencies.

pub mod budget;
pub mod conditions;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod llm;
pub mod task;
pub mod task_service;
pub mod tools;
pub mod traits;
pub mod trigger;
pub mod trigger_service;
pub mod workflow;

pub use budget::{BudgetStatus, BudgetTracker};
pub use conditions::{evaluate_conditions, ConditionErrorPolicy, ConditionEvaluator};
pub use config::Config;
pub use context::RequestContext;
pub use error::{PlatformError, Result};
pub use events::{DomainEvent, WorkflowEventKind};
pub use task::{Task, TaskEvent, TaskStatus};
pub use task_service::{OrchestratorDefaults, TaskOrchestrator};
pub use trigger::{
    ExecutionStatus, Trigger, TriggerCreate, TriggerExecution, TriggerKind, TriggerSpec,
    TriggerUpdate, WebhookType,
};
pub use trigger_service::{TriggerService, AUTO_DISABLE_REASON};
pub use workflow::{
    AgentExecutionRequest, AgentExecutionResult, ExecutionPhase, StateSnapshot, WorkflowRunner,
    WorkflowSignal,
};
