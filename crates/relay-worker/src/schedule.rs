// In-process schedule manager
//
// Adapter over the engine's schedule API. Each cron trigger owns one
// schedule, id `cron-trigger-{trigger_id}`, backed here by a Tokio task that
// computes the next occurrence in the trigger's IANA timezone and invokes
// the bound trigger executor at fire time with
// `{source: "cron", cron, timezone, scheduled_time}`.
//
// Pausing flips a flag without cancelling an in-flight execution; update is
// an idempotent replace; delete treats a missing schedule as success.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde_json::json;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use relay_core::error::{PlatformError, Result};
use relay_core::traits::{schedule_id, ScheduleInfo, ScheduleManager, TriggerExecutor};
use relay_core::trigger::{normalize_cron_expression, validate_timezone};

struct ScheduleEntry {
    cron_expression: String,
    timezone: String,
    paused: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl Drop for ScheduleEntry {
    fn drop(&mut self) {
        self.join.abort();
    }
}

type SharedExecutor = Arc<RwLock<Option<Arc<dyn TriggerExecutor>>>>;

pub struct InProcessScheduleManager {
    executor: SharedExecutor,
    schedules: RwLock<HashMap<Uuid, ScheduleEntry>>,
}

impl InProcessScheduleManager {
    pub fn new() -> Self {
        Self {
            executor: Arc::new(RwLock::new(None)),
            schedules: RwLock::new(HashMap::new()),
        }
    }

    /// Late-bound because the trigger service both owns this manager and is
    /// the executor it fires into.
    pub async fn bind_executor(&self, executor: Arc<dyn TriggerExecutor>) {
        *self.executor.write().await = Some(executor);
    }

    fn parse(cron_expression: &str, timezone: &str) -> Result<(Schedule, Tz)> {
        let normalized = normalize_cron_expression(cron_expression)?;
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| PlatformError::validation(format!("invalid cron expression: {e}")))?;
        let tz = validate_timezone(timezone)?;
        Ok((schedule, tz))
    }

    fn next_fire(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    async fn install(
        &self,
        trigger_id: Uuid,
        cron_expression: &str,
        timezone: &str,
    ) -> Result<()> {
        let (schedule, tz) = Self::parse(cron_expression, timezone)?;
        let (paused_tx, paused_rx) = watch::channel(false);

        let executor = self.executor.clone();
        let expr = cron_expression.to_string();
        let tz_name = timezone.to_string();

        let join = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = Self::next_fire(&schedule, tz, now) else {
                    warn!(trigger_id = %trigger_id, "cron schedule has no future occurrences");
                    break;
                };

                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                if *paused_rx.borrow() {
                    continue;
                }

                let Some(executor) = executor.read().await.clone() else {
                    warn!(trigger_id = %trigger_id, "no trigger executor bound, skipping fire");
                    continue;
                };

                let event_data = json!({
                    "source": "cron",
                    "cron": expr,
                    "timezone": tz_name,
                    "scheduled_time": next,
                });

                info!(trigger_id = %trigger_id, scheduled_time = %next, "cron schedule fired");
                if let Err(e) = executor.execute_trigger(trigger_id, event_data).await {
                    error!(trigger_id = %trigger_id, error = %e, "cron execution failed");
                }
            }
        });

        let entry = ScheduleEntry {
            cron_expression: cron_expression.to_string(),
            timezone: timezone.to_string(),
            paused: paused_tx,
            join,
        };

        // Replacing drops (and aborts) any previous schedule task
        self.schedules.write().await.insert(trigger_id, entry);
        info!(
            schedule_id = %schedule_id(trigger_id),
            cron = cron_expression,
            timezone,
            "schedule installed"
        );
        Ok(())
    }
}

impl Default for InProcessScheduleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduleManager for InProcessScheduleManager {
    async fn create(&self, trigger_id: Uuid, cron_expression: &str, timezone: &str) -> Result<()> {
        self.install(trigger_id, cron_expression, timezone).await
    }

    async fn update(&self, trigger_id: Uuid, cron_expression: &str, timezone: &str) -> Result<()> {
        // Idempotent edit: same id, replaced definition
        self.install(trigger_id, cron_expression, timezone).await
    }

    async fn pause(&self, trigger_id: Uuid) -> Result<()> {
        let schedules = self.schedules.read().await;
        let entry = schedules.get(&trigger_id).ok_or_else(|| {
            PlatformError::not_found(format!("schedule {}", schedule_id(trigger_id)))
        })?;
        let _ = entry.paused.send(true);
        Ok(())
    }

    async fn unpause(&self, trigger_id: Uuid) -> Result<()> {
        let schedules = self.schedules.read().await;
        let entry = schedules.get(&trigger_id).ok_or_else(|| {
            PlatformError::not_found(format!("schedule {}", schedule_id(trigger_id)))
        })?;
        let _ = entry.paused.send(false);
        Ok(())
    }

    async fn delete(&self, trigger_id: Uuid) -> Result<()> {
        // Best-effort: removing an absent schedule is success
        self.schedules.write().await.remove(&trigger_id);
        Ok(())
    }

    async fn info(&self, trigger_id: Uuid) -> Result<Option<ScheduleInfo>> {
        let schedules = self.schedules.read().await;
        let Some(entry) = schedules.get(&trigger_id) else {
            return Ok(None);
        };

        let next_fire_time = Self::parse(&entry.cron_expression, &entry.timezone)
            .ok()
            .and_then(|(schedule, tz)| Self::next_fire(&schedule, tz, Utc::now()));
        let paused = *entry.paused.borrow();

        Ok(Some(ScheduleInfo {
            schedule_id: schedule_id(trigger_id),
            cron_expression: entry.cron_expression.clone(),
            timezone: entry.timezone.clone(),
            paused,
            next_fire_time,
        }))
    }

    async fn list_scheduled(&self) -> Result<Vec<Uuid>> {
        Ok(self.schedules.read().await.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::trigger::TriggerExecution;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingExecutor {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl TriggerExecutor for CountingExecutor {
        async fn execute_trigger(
            &self,
            trigger_id: Uuid,
            event_data: Value,
        ) -> Result<TriggerExecution> {
            assert_eq!(event_data["source"], "cron");
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(TriggerExecution::success(
                trigger_id,
                "ws-1",
                1,
                None,
                event_data,
            ))
        }
    }

    #[tokio::test]
    async fn test_schedule_lifecycle() {
        let manager = InProcessScheduleManager::new();
        let trigger_id = Uuid::new_v4();

        manager
            .create(trigger_id, "0 9 * * 1-5", "UTC")
            .await
            .unwrap();

        let info = manager.info(trigger_id).await.unwrap().unwrap();
        assert_eq!(info.schedule_id, format!("cron-trigger-{trigger_id}"));
        assert_eq!(info.cron_expression, "0 9 * * 1-5");
        assert!(!info.paused);
        assert!(info.next_fire_time.is_some());

        manager.pause(trigger_id).await.unwrap();
        assert!(manager.info(trigger_id).await.unwrap().unwrap().paused);

        manager.unpause(trigger_id).await.unwrap();
        assert!(!manager.info(trigger_id).await.unwrap().unwrap().paused);

        manager.delete(trigger_id).await.unwrap();
        assert!(manager.info(trigger_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_success() {
        let manager = InProcessScheduleManager::new();
        assert!(manager.delete(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn test_pause_missing_is_not_found() {
        let manager = InProcessScheduleManager::new();
        assert!(matches!(
            manager.pause(Uuid::new_v4()).await,
            Err(PlatformError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_cron_rejected() {
        let manager = InProcessScheduleManager::new();
        assert!(manager
            .create(Uuid::new_v4(), "not a cron", "UTC")
            .await
            .is_err());
        assert!(manager
            .create(Uuid::new_v4(), "0 9 * * *", "Mars/OlympusMons")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_is_idempotent_replace() {
        let manager = InProcessScheduleManager::new();
        let trigger_id = Uuid::new_v4();

        manager.create(trigger_id, "0 9 * * *", "UTC").await.unwrap();
        manager
            .update(trigger_id, "0 18 * * *", "America/New_York")
            .await
            .unwrap();

        let info = manager.info(trigger_id).await.unwrap().unwrap();
        assert_eq!(info.cron_expression, "0 18 * * *");
        assert_eq!(info.timezone, "America/New_York");
        assert_eq!(manager.list_scheduled().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_every_second_schedule_fires() {
        let manager = InProcessScheduleManager::new();
        let executor = Arc::new(CountingExecutor::default());
        manager.bind_executor(executor.clone()).await;

        let trigger_id = Uuid::new_v4();
        // Six fields: fires every second
        manager
            .create(trigger_id, "* * * * * *", "UTC")
            .await
            .unwrap();

        // Wall-clock wait; the firing task sleeps on real time
        for _ in 0..30 {
            if executor.fired.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(executor.fired.load(Ordering::SeqCst) > 0);

        manager.delete(trigger_id).await.unwrap();
    }
}
