// Workspace-scoped task persistence

use async_trait::async_trait;
use uuid::Uuid;

use relay_core::error::{PlatformError, Result};
use relay_core::task::Task;
use relay_core::traits::{TaskCreate, TaskFilter, TaskPatch, TaskStore};
use relay_core::RequestContext;

use crate::database::Database;
use crate::models::TaskRow;

const TASK_COLUMNS: &str = "id, workspace_id, created_by, agent_id, description, parameters, \
     status, result, error, started_at, completed_at, execution_id, metadata, created_at, \
     updated_at";

#[derive(Clone)]
pub struct PgTaskStore {
    db: Database,
    ctx: RequestContext,
}

impl PgTaskStore {
    pub fn new(db: Database, ctx: RequestContext) -> Self {
        Self { db, ctx }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, input: TaskCreate) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO tasks (
                id, workspace_id, created_by, agent_id, description, parameters,
                status, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&self.ctx.workspace_id)
        .bind(&self.ctx.user_id)
        .bind(input.agent_id)
        .bind(&input.description)
        .bind(&input.parameters)
        .bind(input.status.as_str())
        .bind(&input.metadata)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        row.into_domain()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND workspace_id = $2"
        ))
        .bind(id)
        .bind(&self.ctx.workspace_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        row.map(TaskRow::into_domain).transpose()
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task> {
        // execution_id is set once at start and never overwritten
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
            SET
                status = COALESCE($3, status),
                result = COALESCE($4, result),
                error = COALESCE($5, error),
                started_at = COALESCE($6, started_at),
                completed_at = COALESCE($7, completed_at),
                execution_id = COALESCE(execution_id, $8),
                updated_at = NOW()
            WHERE id = $1 AND workspace_id = $2
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&self.ctx.workspace_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(&patch.result)
        .bind(&patch.error)
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .bind(&patch.execution_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?
        .ok_or_else(|| PlatformError::not_found(format!("task {id}")))?;

        row.into_domain()
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let creator = filter.creator_scoped.then(|| self.ctx.user_id.clone());
        let limit = if filter.limit > 0 { filter.limit } else { 100 }.min(1000);
        let offset = filter.offset.max(0);

        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE workspace_id = $1
              AND ($2::uuid IS NULL OR agent_id = $2)
              AND ($3::text IS NULL OR created_by = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(&self.ctx.workspace_id)
        .bind(filter.agent_id)
        .bind(creator)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        rows.into_iter().map(TaskRow::into_domain).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND workspace_id = $2")
            .bind(id)
            .bind(&self.ctx.workspace_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| PlatformError::dependency(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
