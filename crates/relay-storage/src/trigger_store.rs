// Workspace-scoped trigger persistence
//
// The store is bound to a request context at construction. Reads filter by
// the bound workspace, creates stamp workspace_id/created_by from it, and
// updates/deletes include it in the WHERE clause so foreign rows behave as
// absent. The one exception is the unscoped webhook lookup used by the
// public ingest endpoint, which has no tenant context until the trigger row
// itself provides one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use relay_core::error::{PlatformError, Result};
use relay_core::traits::{
    ExecutionFilter, ExecutionMetrics, ExecutionPage, TimelineBucket, TriggerFilter, TriggerStore,
};
use relay_core::trigger::{
    Trigger, TriggerCreate, TriggerExecution, TriggerUpdate, DEFAULT_FAILURE_THRESHOLD,
};
use relay_core::RequestContext;

use crate::database::Database;
use crate::models::{TriggerExecutionRow, TriggerRow, TriggerSpecColumns};

const TRIGGER_COLUMNS: &str = "id, workspace_id, created_by, name, description, agent_id, kind, \
     is_active, task_parameters, conditions, failure_threshold, consecutive_failures, \
     last_execution_at, cron_expression, timezone, next_run_time, webhook_id, allowed_methods, \
     webhook_type, validation_rules, webhook_config, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, trigger_id, workspace_id, executed_at, status, task_id, \
     execution_time_ms, error_message, trigger_data, workflow_id, run_id";

#[derive(Clone)]
pub struct PgTriggerStore {
    db: Database,
    ctx: RequestContext,
}

impl PgTriggerStore {
    pub fn new(db: Database, ctx: RequestContext) -> Self {
        Self { db, ctx }
    }

    /// Guard used before returning execution data: the trigger itself must be
    /// visible in this workspace.
    async fn require_trigger(&self, trigger_id: Uuid) -> Result<Trigger> {
        self.get(trigger_id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("trigger {trigger_id}")))
    }
}

/// Unscoped webhook lookup for the public ingest path. Several triggers may
/// share one webhook id; each returned trigger carries the workspace that
/// owns it, and the router binds scoped stores from that before executing
/// anything.
pub async fn lookup_webhook_triggers(db: &Database, webhook_id: &str) -> Result<Vec<Trigger>> {
    let rows = sqlx::query_as::<_, TriggerRow>(&format!(
        "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE webhook_id = $1 ORDER BY created_at ASC"
    ))
    .bind(webhook_id)
    .fetch_all(db.pool())
    .await
    .map_err(|e| PlatformError::dependency(e.to_string()))?;

    rows.into_iter().map(TriggerRow::into_domain).collect()
}

/// Unscoped sweep query for the schedule reconciler: every active cron
/// trigger across workspaces.
pub async fn list_active_cron_triggers(db: &Database) -> Result<Vec<Trigger>> {
    let rows = sqlx::query_as::<_, TriggerRow>(&format!(
        "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE kind = 'cron' AND is_active"
    ))
    .fetch_all(db.pool())
    .await
    .map_err(|e| PlatformError::dependency(e.to_string()))?;

    rows.into_iter().map(TriggerRow::into_domain).collect()
}

/// Unscoped trigger lookup used by cron firings, which carry no request
/// context until the trigger row itself provides one.
pub async fn lookup_trigger(db: &Database, id: Uuid) -> Result<Option<Trigger>> {
    let row = sqlx::query_as::<_, TriggerRow>(&format!(
        "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db.pool())
    .await
    .map_err(|e| PlatformError::dependency(e.to_string()))?;

    row.map(TriggerRow::into_domain).transpose()
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn create(&self, input: TriggerCreate) -> Result<Trigger> {
        input.validate()?;

        let id = Uuid::new_v4();
        let kind = input.spec.kind();
        let cols = TriggerSpecColumns::from(&input.spec);
        let failure_threshold = input
            .failure_threshold
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD);

        let row = sqlx::query_as::<_, TriggerRow>(&format!(
            r#"
            INSERT INTO triggers (
                id, workspace_id, created_by, name, description, agent_id, kind,
                is_active, task_parameters, conditions, failure_threshold,
                cron_expression, timezone, next_run_time,
                webhook_id, allowed_methods, webhook_type, validation_rules, webhook_config
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {TRIGGER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&self.ctx.workspace_id)
        .bind(&self.ctx.user_id)
        .bind(input.name.trim())
        .bind(&input.description)
        .bind(input.agent_id)
        .bind(kind.as_str())
        .bind(&input.task_parameters)
        .bind(&input.conditions)
        .bind(failure_threshold)
        .bind(&cols.cron_expression)
        .bind(&cols.timezone)
        .bind(cols.next_run_time)
        .bind(&cols.webhook_id)
        .bind(&cols.allowed_methods)
        .bind(&cols.webhook_type)
        .bind(&cols.validation_rules)
        .bind(&cols.webhook_config)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        row.into_domain()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Trigger>> {
        let row = sqlx::query_as::<_, TriggerRow>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = $1 AND workspace_id = $2"
        ))
        .bind(id)
        .bind(&self.ctx.workspace_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        row.map(TriggerRow::into_domain).transpose()
    }

    async fn update(&self, id: Uuid, update: TriggerUpdate) -> Result<Trigger> {
        update.validate()?;

        let row = sqlx::query_as::<_, TriggerRow>(&format!(
            r#"
            UPDATE triggers
            SET
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                is_active = COALESCE($5, is_active),
                task_parameters = COALESCE($6, task_parameters),
                conditions = COALESCE($7, conditions),
                failure_threshold = COALESCE($8, failure_threshold),
                cron_expression = COALESCE($9, cron_expression),
                timezone = COALESCE($10, timezone),
                allowed_methods = COALESCE($11, allowed_methods),
                validation_rules = COALESCE($12, validation_rules),
                webhook_config = COALESCE($13, webhook_config),
                updated_at = NOW()
            WHERE id = $1 AND workspace_id = $2
            RETURNING {TRIGGER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&self.ctx.workspace_id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(&update.description)
        .bind(update.is_active)
        .bind(&update.task_parameters)
        .bind(&update.conditions)
        .bind(update.failure_threshold)
        .bind(&update.cron_expression)
        .bind(&update.timezone)
        .bind(&update.allowed_methods)
        .bind(&update.validation_rules)
        .bind(&update.webhook_config)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?
        .ok_or_else(|| PlatformError::not_found(format!("trigger {id}")))?;

        row.into_domain()
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        // Executions cascade at the schema level
        let result = sqlx::query("DELETE FROM triggers WHERE id = $1 AND workspace_id = $2")
            .bind(id)
            .bind(&self.ctx.workspace_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| PlatformError::dependency(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: TriggerFilter) -> Result<Vec<Trigger>> {
        let creator = filter.creator_scoped.then(|| self.ctx.user_id.clone());
        let limit = filter.limit.unwrap_or(100).clamp(1, 1000);

        let rows = sqlx::query_as::<_, TriggerRow>(&format!(
            r#"
            SELECT {TRIGGER_COLUMNS}
            FROM triggers
            WHERE workspace_id = $1
              AND ($2::uuid IS NULL OR agent_id = $2)
              AND ($3::text IS NULL OR kind = $3)
              AND (NOT $4 OR is_active)
              AND ($5::text IS NULL OR created_by = $5)
            ORDER BY created_at DESC
            LIMIT $6
            "#
        ))
        .bind(&self.ctx.workspace_id)
        .bind(filter.agent_id)
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.active_only)
        .bind(creator)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        rows.into_iter().map(TriggerRow::into_domain).collect()
    }

    async fn get_by_webhook_id(&self, webhook_id: &str) -> Result<Option<Trigger>> {
        let row = sqlx::query_as::<_, TriggerRow>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE webhook_id = $1 AND workspace_id = $2 \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(webhook_id)
        .bind(&self.ctx.workspace_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        row.map(TriggerRow::into_domain).transpose()
    }

    async fn list_cron_due(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>> {
        let rows = sqlx::query_as::<_, TriggerRow>(&format!(
            r#"
            SELECT {TRIGGER_COLUMNS}
            FROM triggers
            WHERE workspace_id = $1 AND kind = 'cron' AND is_active
              AND next_run_time IS NOT NULL AND next_run_time <= $2
            ORDER BY next_run_time ASC
            "#
        ))
        .bind(&self.ctx.workspace_id)
        .bind(now)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        rows.into_iter().map(TriggerRow::into_domain).collect()
    }

    async fn update_execution_tracking(
        &self,
        id: Uuid,
        last_execution_at: DateTime<Utc>,
        consecutive_failures: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET last_execution_at = $3, consecutive_failures = $4, updated_at = NOW()
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(id)
        .bind(&self.ctx.workspace_id)
        .bind(last_execution_at)
        .bind(consecutive_failures)
        .execute(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PlatformError::not_found(format!("trigger {id}")));
        }
        Ok(())
    }

    async fn record_execution(&self, execution: TriggerExecution) -> Result<TriggerExecution> {
        let row = sqlx::query_as::<_, TriggerExecutionRow>(&format!(
            r#"
            INSERT INTO trigger_executions (
                id, trigger_id, workspace_id, executed_at, status, task_id,
                execution_time_ms, error_message, trigger_data, workflow_id, run_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(execution.id)
        .bind(execution.trigger_id)
        .bind(&self.ctx.workspace_id)
        .bind(execution.executed_at)
        .bind(execution.status.as_str())
        .bind(execution.task_id)
        .bind(execution.execution_time_ms)
        .bind(&execution.error_message)
        .bind(&execution.trigger_data)
        .bind(&execution.workflow_id)
        .bind(&execution.run_id)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        row.into_domain()
    }

    async fn list_executions(
        &self,
        trigger_id: Uuid,
        filter: ExecutionFilter,
    ) -> Result<ExecutionPage> {
        self.require_trigger(trigger_id).await?;

        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 100);
        let offset = (page - 1) * page_size;
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM trigger_executions
            WHERE trigger_id = $1 AND workspace_id = $2
              AND ($3::text IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR executed_at >= $4)
              AND ($5::timestamptz IS NULL OR executed_at <= $5)
            "#,
        )
        .bind(trigger_id)
        .bind(&self.ctx.workspace_id)
        .bind(status)
        .bind(filter.start_time)
        .bind(filter.end_time)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        let rows = sqlx::query_as::<_, TriggerExecutionRow>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM trigger_executions
            WHERE trigger_id = $1 AND workspace_id = $2
              AND ($3::text IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR executed_at >= $4)
              AND ($5::timestamptz IS NULL OR executed_at <= $5)
            ORDER BY executed_at DESC
            LIMIT $6 OFFSET $7
            "#
        ))
        .bind(trigger_id)
        .bind(&self.ctx.workspace_id)
        .bind(status)
        .bind(filter.start_time)
        .bind(filter.end_time)
        .bind(page_size)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        let executions = rows
            .into_iter()
            .map(TriggerExecutionRow::into_domain)
            .collect::<Result<Vec<_>>>()?;

        Ok(ExecutionPage {
            executions,
            total,
            page,
            page_size,
            has_next: page * page_size < total,
        })
    }

    async fn execution_metrics(&self, trigger_id: Uuid, hours: i64) -> Result<ExecutionMetrics> {
        self.require_trigger(trigger_id).await?;

        #[derive(sqlx::FromRow)]
        struct MetricsRow {
            total: i64,
            successful: i64,
            failed: i64,
            timeouts: i64,
            avg_ms: Option<f64>,
            min_ms: Option<i64>,
            max_ms: Option<i64>,
        }

        let row = sqlx::query_as::<_, MetricsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'success') AS successful,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'timeout') AS timeouts,
                AVG(execution_time_ms)::float8 AS avg_ms,
                MIN(execution_time_ms) AS min_ms,
                MAX(execution_time_ms) AS max_ms
            FROM trigger_executions
            WHERE trigger_id = $1 AND workspace_id = $2
              AND executed_at >= NOW() - ($3 || ' hours')::interval
            "#,
        )
        .bind(trigger_id)
        .bind(&self.ctx.workspace_id)
        .bind(hours.to_string())
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        let success_rate = if row.total > 0 {
            row.successful as f64 / row.total as f64
        } else {
            0.0
        };

        Ok(ExecutionMetrics {
            trigger_id,
            window_hours: hours,
            total_executions: row.total,
            successful_executions: row.successful,
            failed_executions: row.failed,
            timeout_executions: row.timeouts,
            success_rate,
            avg_execution_time_ms: row.avg_ms,
            min_execution_time_ms: row.min_ms,
            max_execution_time_ms: row.max_ms,
        })
    }

    async fn execution_timeline(
        &self,
        trigger_id: Uuid,
        hours: i64,
        bucket_minutes: i64,
    ) -> Result<Vec<TimelineBucket>> {
        self.require_trigger(trigger_id).await?;

        #[derive(sqlx::FromRow)]
        struct BucketRow {
            bucket_start: DateTime<Utc>,
            total: i64,
            successful: i64,
            failed: i64,
        }

        let bucket_seconds = (bucket_minutes * 60) as f64;

        let rows = sqlx::query_as::<_, BucketRow>(
            r#"
            SELECT
                to_timestamp(floor(extract(epoch FROM executed_at) / $3) * $3) AS bucket_start,
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'success') AS successful,
                COUNT(*) FILTER (WHERE status <> 'success') AS failed
            FROM trigger_executions
            WHERE trigger_id = $1 AND workspace_id = $2
              AND executed_at >= NOW() - ($4 || ' hours')::interval
            GROUP BY bucket_start
            ORDER BY bucket_start ASC
            "#,
        )
        .bind(trigger_id)
        .bind(&self.ctx.workspace_id)
        .bind(bucket_seconds)
        .bind(hours.to_string())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| TimelineBucket {
                bucket_start: row.bucket_start,
                total: row.total,
                successful: row.successful,
                failed: row.failed,
            })
            .collect())
    }
}
