// Domain events
//
// Every event carries a globally unique `event_id` (the deduplication key for
// replay+live subscriptions), a dotted `event_type`, a timestamp, and a JSON
// payload. Workflow events additionally carry task_id / agent_id /
// execution_id inside `data` so subscribers can filter without unwrapping
// type-specific fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Event kinds emitted by the agent execution workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    WorkflowStarted,
    IterationStarted,
    LlmCallStarted,
    LlmCallCompleted,
    LlmCallFailed,
    ToolCallStarted,
    ToolCallCompleted,
    ToolCallFailed,
    BudgetWarning,
    BudgetExceeded,
    HumanApprovalRequested,
    HumanApprovalReceived,
    IterationCompleted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
}

impl WorkflowEventKind {
    /// Wire name within the `workflow.` namespace
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowEventKind::WorkflowStarted => "workflow.workflow_started",
            WorkflowEventKind::IterationStarted => "workflow.iteration_started",
            WorkflowEventKind::LlmCallStarted => "workflow.llm_call_started",
            WorkflowEventKind::LlmCallCompleted => "workflow.llm_call_completed",
            WorkflowEventKind::LlmCallFailed => "workflow.llm_call_failed",
            WorkflowEventKind::ToolCallStarted => "workflow.tool_call_started",
            WorkflowEventKind::ToolCallCompleted => "workflow.tool_call_completed",
            WorkflowEventKind::ToolCallFailed => "workflow.tool_call_failed",
            WorkflowEventKind::BudgetWarning => "workflow.budget_warning",
            WorkflowEventKind::BudgetExceeded => "workflow.budget_exceeded",
            WorkflowEventKind::HumanApprovalRequested => "workflow.human_approval_requested",
            WorkflowEventKind::HumanApprovalReceived => "workflow.human_approval_received",
            WorkflowEventKind::IterationCompleted => "workflow.iteration_completed",
            WorkflowEventKind::WorkflowCompleted => "workflow.workflow_completed",
            WorkflowEventKind::WorkflowFailed => "workflow.workflow_failed",
            WorkflowEventKind::WorkflowCancelled => "workflow.workflow_cancelled",
        }
    }
}

/// Event type published when a trigger crosses its failure threshold
pub const TRIGGER_AUTO_DISABLED: &str = "trigger.auto_disabled";

/// Event types that close a task's event stream
const TERMINAL_EVENT_TYPES: [&str; 6] = [
    "workflow.workflow_completed",
    "workflow.workflow_failed",
    "workflow.workflow_cancelled",
    "workflow.task_completed",
    "workflow.task_failed",
    "workflow.task_cancelled",
];

pub fn is_terminal_event_type(event_type: &str) -> bool {
    TERMINAL_EVENT_TYPES.contains(&event_type)
}

/// Envelope for every published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl DomainEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Workflow event with the standard base fields merged into `data`
    pub fn workflow(
        kind: WorkflowEventKind,
        task_id: Uuid,
        agent_id: Uuid,
        execution_id: &str,
        extra: Value,
    ) -> Self {
        let mut data = json!({
            "task_id": task_id,
            "agent_id": agent_id,
            "execution_id": execution_id,
        });
        if let (Some(base), Some(fields)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in fields {
                base.insert(k.clone(), v.clone());
            }
        }
        Self::new(kind.event_type(), data)
    }

    pub fn trigger_auto_disabled(
        trigger_id: Uuid,
        consecutive_failures: i32,
        disabled_at: DateTime<Utc>,
        reason: &str,
    ) -> Self {
        Self::new(
            TRIGGER_AUTO_DISABLED,
            json!({
                "trigger_id": trigger_id,
                "consecutive_failures": consecutive_failures,
                "disabled_at": disabled_at,
                "reason": reason,
            }),
        )
    }

    /// Task this event belongs to, when it carries one
    pub fn task_id(&self) -> Option<Uuid> {
        self.data
            .get("task_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal_event_type(&self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_event_base_fields() {
        let task_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();
        let event = DomainEvent::workflow(
            WorkflowEventKind::IterationStarted,
            task_id,
            agent_id,
            "task-abc",
            json!({"iteration": 3}),
        );

        assert_eq!(event.event_type, "workflow.iteration_started");
        assert_eq!(event.task_id(), Some(task_id));
        assert_eq!(event.data["iteration"], 3);
        assert_eq!(event.data["execution_id"], "task-abc");
    }

    #[test]
    fn test_terminal_event_types() {
        assert!(is_terminal_event_type("workflow.workflow_completed"));
        assert!(is_terminal_event_type("workflow.task_cancelled"));
        assert!(!is_terminal_event_type("workflow.iteration_started"));
        assert!(!is_terminal_event_type(TRIGGER_AUTO_DISABLED));
    }

    #[test]
    fn test_auto_disabled_payload() {
        let trigger_id = Uuid::new_v4();
        let event = DomainEvent::trigger_auto_disabled(
            trigger_id,
            5,
            Utc::now(),
            "consecutive_failures_threshold_exceeded",
        );
        assert_eq!(event.event_type, "trigger.auto_disabled");
        assert_eq!(event.data["consecutive_failures"], 5);
        assert_eq!(
            event.data["reason"],
            "consecutive_failures_threshold_exceeded"
        );
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = DomainEvent::new("workflow.iteration_started", json!({}));
        let b = DomainEvent::new("workflow.iteration_started", json!({}));
        assert_ne!(a.event_id, b.event_id);
    }
}
