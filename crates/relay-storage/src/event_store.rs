// Durable per-task event log
//
// Appends are idempotent on the event id (exactly-once persistence); reads
// order by timestamp with the insertion sequence breaking ties.

use async_trait::async_trait;
use uuid::Uuid;

use relay_core::error::{PlatformError, Result};
use relay_core::task::TaskEvent;
use relay_core::traits::TaskEventStore;

use crate::database::Database;
use crate::models::TaskEventRow;

const EVENT_COLUMNS: &str = "id, task_id, event_type, timestamp, data, metadata";

#[derive(Clone)]
pub struct PgTaskEventStore {
    db: Database,
}

impl PgTaskEventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskEventStore for PgTaskEventStore {
    async fn append(&self, event: TaskEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_events (id, task_id, event_type, timestamp, data, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.task_id)
        .bind(&event.event_type)
        .bind(event.timestamp)
        .bind(&event.data)
        .bind(&event.metadata)
        .execute(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<TaskEvent>> {
        let rows = sqlx::query_as::<_, TaskEventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM task_events
            WHERE task_id = $1
            ORDER BY timestamp ASC, seq ASC
            "#
        ))
        .bind(task_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        Ok(rows.into_iter().map(TaskEvent::from).collect())
    }

    async fn list_page(&self, task_id: Uuid, limit: i64, offset: i64) -> Result<Vec<TaskEvent>> {
        let rows = sqlx::query_as::<_, TaskEventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM task_events
            WHERE task_id = $1
            ORDER BY timestamp ASC, seq ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(task_id)
        .bind(limit.clamp(1, 1000))
        .bind(offset.max(0))
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PlatformError::dependency(e.to_string()))?;

        Ok(rows.into_iter().map(TaskEvent::from).collect())
    }
}
