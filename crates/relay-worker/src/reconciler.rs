// Trigger <-> schedule reconciler
//
// The trigger row and its engine schedule are eventually consistent: a
// scheduling call can fail after the row commits, and a deleted trigger can
// leave an orphan schedule behind. This sweep closes both gaps; it never
// attempts a two-phase commit across the database and the engine.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use relay_core::error::Result;
use relay_core::traits::ScheduleManager;
use relay_storage::{list_active_cron_triggers, Database};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct ScheduleReconciler {
    db: Database,
    schedules: Arc<dyn ScheduleManager>,
    interval: Duration,
}

impl ScheduleReconciler {
    pub fn new(db: Database, schedules: Arc<dyn ScheduleManager>) -> Self {
        Self {
            db,
            schedules,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run forever; individual sweep failures are logged and retried on the
    /// next tick.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "schedule reconciliation sweep failed");
            }
        }
    }

    /// One reconciliation pass: create schedules missing for active cron
    /// triggers, remove schedules whose trigger is gone or inactive.
    pub async fn sweep(&self) -> Result<()> {
        let triggers = list_active_cron_triggers(&self.db).await?;
        let scheduled: HashSet<Uuid> = self.schedules.list_scheduled().await?.into_iter().collect();
        let active: HashSet<Uuid> = triggers.iter().map(|t| t.id).collect();

        for trigger in &triggers {
            if scheduled.contains(&trigger.id) {
                continue;
            }
            let Some((expr, tz)) = trigger.cron_schedule() else {
                continue;
            };
            info!(trigger_id = %trigger.id, "reconciler attaching missing schedule");
            if let Err(e) = self.schedules.create(trigger.id, expr, tz).await {
                warn!(trigger_id = %trigger.id, error = %e, "schedule attach failed");
            }
        }

        for orphan in scheduled.difference(&active) {
            info!(trigger_id = %orphan, "reconciler removing orphan schedule");
            if let Err(e) = self.schedules.delete(*orphan).await {
                warn!(trigger_id = %orphan, error = %e, "orphan schedule removal failed");
            }
        }

        Ok(())
    }
}
