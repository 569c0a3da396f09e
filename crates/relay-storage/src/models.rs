// Database rows (internal, converted to/from domain types)
//
// Triggers persist as one wide row: shared header columns plus nullable
// cron and webhook columns, discriminated by `kind`. A row whose
// discriminator disagrees with its populated columns is rejected on read.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use relay_core::error::{PlatformError, Result};
use relay_core::task::{Task, TaskEvent, TaskStatus};
use relay_core::trigger::{
    ExecutionStatus, Trigger, TriggerExecution, TriggerKind, TriggerSpec, WebhookType,
};

// ============================================
// Trigger rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct TriggerRow {
    pub id: Uuid,
    pub workspace_id: String,
    pub created_by: String,
    pub name: String,
    pub description: String,
    pub agent_id: Uuid,
    pub kind: String,
    pub is_active: bool,
    pub task_parameters: Value,
    pub conditions: Value,
    pub failure_threshold: i32,
    pub consecutive_failures: i32,
    pub last_execution_at: Option<DateTime<Utc>>,
    // Cron columns
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub next_run_time: Option<DateTime<Utc>>,
    // Webhook columns
    pub webhook_id: Option<String>,
    pub allowed_methods: Option<Vec<String>>,
    pub webhook_type: Option<String>,
    pub validation_rules: Option<Value>,
    pub webhook_config: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TriggerRow {
    pub fn into_domain(self) -> Result<Trigger> {
        let kind: TriggerKind = self.kind.parse()?;

        let spec = match kind {
            TriggerKind::Cron => TriggerSpec::Cron {
                cron_expression: self.cron_expression.ok_or_else(|| {
                    PlatformError::validation("cron trigger row missing cron_expression")
                })?,
                timezone: self
                    .timezone
                    .ok_or_else(|| PlatformError::validation("cron trigger row missing timezone"))?,
                next_run_time: self.next_run_time,
            },
            TriggerKind::Webhook => TriggerSpec::Webhook {
                webhook_id: self.webhook_id.ok_or_else(|| {
                    PlatformError::validation("webhook trigger row missing webhook_id")
                })?,
                allowed_methods: self.allowed_methods.unwrap_or_default(),
                webhook_type: self
                    .webhook_type
                    .as_deref()
                    .unwrap_or("generic")
                    .parse::<WebhookType>()?,
                validation_rules: self
                    .validation_rules
                    .unwrap_or(Value::Object(serde_json::Map::new())),
                webhook_config: self.webhook_config,
            },
        };

        Ok(Trigger {
            id: self.id,
            name: self.name,
            description: self.description,
            agent_id: self.agent_id,
            workspace_id: self.workspace_id,
            created_by: self.created_by,
            is_active: self.is_active,
            task_parameters: self.task_parameters,
            conditions: self.conditions,
            failure_threshold: self.failure_threshold,
            consecutive_failures: self.consecutive_failures,
            last_execution_at: self.last_execution_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            spec,
        })
    }
}

/// Nullable column values for the type-specific half of an insert
#[derive(Debug, Clone, Default)]
pub struct TriggerSpecColumns {
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub webhook_id: Option<String>,
    pub allowed_methods: Option<Vec<String>>,
    pub webhook_type: Option<String>,
    pub validation_rules: Option<Value>,
    pub webhook_config: Option<Value>,
}

impl From<&TriggerSpec> for TriggerSpecColumns {
    fn from(spec: &TriggerSpec) -> Self {
        match spec {
            TriggerSpec::Cron {
                cron_expression,
                timezone,
                next_run_time,
            } => TriggerSpecColumns {
                cron_expression: Some(cron_expression.clone()),
                timezone: Some(timezone.clone()),
                next_run_time: *next_run_time,
                ..Default::default()
            },
            TriggerSpec::Webhook {
                webhook_id,
                allowed_methods,
                webhook_type,
                validation_rules,
                webhook_config,
            } => TriggerSpecColumns {
                webhook_id: Some(webhook_id.clone()),
                allowed_methods: Some(allowed_methods.clone()),
                webhook_type: Some(webhook_type.as_str().to_string()),
                validation_rules: Some(validation_rules.clone()),
                webhook_config: webhook_config.clone(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TriggerExecutionRow {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub workspace_id: String,
    pub executed_at: DateTime<Utc>,
    pub status: String,
    pub task_id: Option<Uuid>,
    pub execution_time_ms: i64,
    pub error_message: Option<String>,
    pub trigger_data: Value,
    pub workflow_id: Option<String>,
    pub run_id: Option<String>,
}

impl TriggerExecutionRow {
    pub fn into_domain(self) -> Result<TriggerExecution> {
        Ok(TriggerExecution {
            id: self.id,
            trigger_id: self.trigger_id,
            workspace_id: self.workspace_id,
            executed_at: self.executed_at,
            status: self.status.parse::<ExecutionStatus>()?,
            task_id: self.task_id,
            execution_time_ms: self.execution_time_ms,
            error_message: self.error_message,
            trigger_data: self.trigger_data,
            workflow_id: self.workflow_id,
            run_id: self.run_id,
        })
    }
}

// ============================================
// Task rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub workspace_id: String,
    pub created_by: String,
    pub agent_id: Uuid,
    pub description: String,
    pub parameters: Value,
    pub status: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRow {
    pub fn into_domain(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            agent_id: self.agent_id,
            workspace_id: self.workspace_id,
            created_by: self.created_by,
            description: self.description,
            parameters: self.parameters,
            status: self.status.parse::<TaskStatus>()?,
            result: self.result,
            error: self.error,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_id: self.execution_id,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ============================================
// Task event rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct TaskEventRow {
    pub id: Uuid,
    pub task_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub metadata: Value,
}

impl From<TaskEventRow> for TaskEvent {
    fn from(row: TaskEventRow) -> Self {
        TaskEvent {
            id: row.id,
            task_id: row.task_id,
            event_type: row.event_type,
            timestamp: row.timestamp,
            data: row.data,
            metadata: row.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_row() -> TriggerRow {
        TriggerRow {
            id: Uuid::new_v4(),
            workspace_id: "ws-1".to_string(),
            created_by: "user-1".to_string(),
            name: "t".to_string(),
            description: String::new(),
            agent_id: Uuid::new_v4(),
            kind: "cron".to_string(),
            is_active: true,
            task_parameters: json!({}),
            conditions: json!({}),
            failure_threshold: 5,
            consecutive_failures: 0,
            last_execution_at: None,
            cron_expression: Some("0 9 * * *".to_string()),
            timezone: Some("UTC".to_string()),
            next_run_time: None,
            webhook_id: None,
            allowed_methods: None,
            webhook_type: None,
            validation_rules: None,
            webhook_config: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_cron_row_round_trip() {
        let trigger = base_row().into_domain().unwrap();
        assert_eq!(trigger.kind(), TriggerKind::Cron);
        assert_eq!(trigger.cron_schedule(), Some(("0 9 * * *", "UTC")));
    }

    #[test]
    fn test_mismatched_discriminator_rejected() {
        let mut row = base_row();
        row.kind = "webhook".to_string();
        // webhook columns are all NULL
        assert!(row.into_domain().is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut row = base_row();
        row.kind = "carrier-pigeon".to_string();
        assert!(row.into_domain().is_err());
    }

    #[test]
    fn test_spec_columns_split() {
        let spec = TriggerSpec::Webhook {
            webhook_id: "wh-1".to_string(),
            allowed_methods: vec!["POST".to_string()],
            webhook_type: WebhookType::Generic,
            validation_rules: json!({}),
            webhook_config: None,
        };
        let cols = TriggerSpecColumns::from(&spec);
        assert_eq!(cols.webhook_id.as_deref(), Some("wh-1"));
        assert!(cols.cron_expression.is_none());
    }
}
