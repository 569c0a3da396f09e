// Trigger service - the policy layer over trigger persistence, the engine
// schedule adapter, and the task orchestrator
//
// Coupling discipline: the DB mutation happens first, the engine call after,
// outside any transaction. A scheduling failure leaves the trigger persisted
// but not scheduled (it can be rescheduled later); it never rolls the row
// back.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::conditions::{evaluate_conditions, ConditionErrorPolicy, ConditionEvaluator};
use crate::context::RequestContext;
use crate::error::{PlatformError, Result};
use crate::events::DomainEvent;
use crate::traits::{
    AgentDirectory, EventPublisher, ExecutionFilter, ExecutionMetrics, ExecutionPage,
    ScheduleInfo, ScheduleManager, TaskLauncher, TaskRequest, TimelineBucket, TriggerExecutor,
    TriggerFilter, TriggerStore,
};
use crate::trigger::{Trigger, TriggerCreate, TriggerExecution, TriggerKind, TriggerUpdate};

/// Reason recorded when a trigger is disabled for crossing its threshold
pub const AUTO_DISABLE_REASON: &str = "consecutive_failures_threshold_exceeded";

/// Safety/health view of one trigger
#[derive(Debug, Clone, serde::Serialize)]
pub struct TriggerSafetyStatus {
    pub trigger_id: Uuid,
    pub is_active: bool,
    pub last_execution_at: Option<chrono::DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub failure_threshold: i32,
    pub should_disable_due_to_failures: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_info: Option<ScheduleInfo>,
}

pub struct TriggerService {
    triggers: Arc<dyn TriggerStore>,
    directory: Arc<dyn AgentDirectory>,
    launcher: Arc<dyn TaskLauncher>,
    schedules: Arc<dyn ScheduleManager>,
    publisher: Arc<dyn EventPublisher>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
    error_policy: ConditionErrorPolicy,
    ctx: RequestContext,
}

impl TriggerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        directory: Arc<dyn AgentDirectory>,
        launcher: Arc<dyn TaskLauncher>,
        schedules: Arc<dyn ScheduleManager>,
        publisher: Arc<dyn EventPublisher>,
        error_policy: ConditionErrorPolicy,
        ctx: RequestContext,
    ) -> Self {
        Self {
            triggers,
            directory,
            launcher,
            schedules,
            publisher,
            evaluator: None,
            error_policy,
            ctx,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    // ========================================================================
    // CRUD + lifecycle
    // ========================================================================

    pub async fn create_trigger(&self, input: TriggerCreate) -> Result<Trigger> {
        input.validate()?;

        if !self.directory.exists(input.agent_id, &self.ctx).await? {
            return Err(PlatformError::validation(format!(
                "agent {} does not exist",
                input.agent_id
            )));
        }

        let trigger = self.triggers.create(input).await?;

        if let Some((expr, tz)) = trigger.cron_schedule() {
            if let Err(e) = self.schedules.create(trigger.id, expr, tz).await {
                // Persisted but not scheduled; the reconciler or a later
                // update can attach the schedule.
                error!(
                    trigger_id = %trigger.id,
                    error = %e,
                    "trigger persisted but not scheduled"
                );
            }
        }

        info!(trigger_id = %trigger.id, kind = %trigger.kind(), "trigger created");
        Ok(trigger)
    }

    pub async fn get_trigger(&self, id: Uuid) -> Result<Option<Trigger>> {
        self.triggers.get(id).await
    }

    pub async fn list_triggers(&self, filter: TriggerFilter) -> Result<Vec<Trigger>> {
        self.triggers.list(filter).await
    }

    pub async fn update_trigger(&self, id: Uuid, update: TriggerUpdate) -> Result<Trigger> {
        update.validate()?;

        let before = self
            .triggers
            .get(id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("trigger {id}")))?;

        let schedule_changed =
            update.cron_expression.is_some() || update.timezone.is_some();
        let activity_changed = update.is_active;

        let trigger = self.triggers.update(id, update).await?;

        if trigger.kind() == TriggerKind::Cron {
            if let Some((expr, tz)) = trigger.cron_schedule() {
                if schedule_changed {
                    if let Err(e) = self.schedules.update(id, expr, tz).await {
                        error!(trigger_id = %id, error = %e, "schedule update failed");
                    }
                }
            }
            match activity_changed {
                Some(true) if !before.is_active => self.unpause_schedule(id).await,
                Some(false) if before.is_active => self.pause_schedule(id).await,
                _ => {}
            }
        }

        Ok(trigger)
    }

    /// Delete the engine schedule first (idempotent), then the row; the row
    /// delete cascades to execution records.
    pub async fn delete_trigger(&self, id: Uuid) -> Result<bool> {
        let Some(trigger) = self.triggers.get(id).await? else {
            return Ok(false);
        };

        if trigger.kind() == TriggerKind::Cron {
            if let Err(e) = self.schedules.delete(id).await {
                warn!(trigger_id = %id, error = %e, "schedule delete failed, continuing");
            }
        }

        self.triggers.delete(id).await
    }

    pub async fn enable_trigger(&self, id: Uuid) -> Result<Trigger> {
        let trigger = self
            .triggers
            .update(
                id,
                TriggerUpdate {
                    is_active: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        if trigger.kind() == TriggerKind::Cron {
            self.unpause_schedule(id).await;
        }
        info!(trigger_id = %id, "trigger enabled");
        Ok(trigger)
    }

    /// Returns the trigger and whether this call transitioned it from active
    /// to inactive. Disabling an already-disabled trigger is a no-op.
    pub async fn disable_trigger(&self, id: Uuid) -> Result<(Trigger, bool)> {
        let before = self
            .triggers
            .get(id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("trigger {id}")))?;

        if !before.is_active {
            return Ok((before, false));
        }

        let trigger = self
            .triggers
            .update(
                id,
                TriggerUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        if trigger.kind() == TriggerKind::Cron {
            self.pause_schedule(id).await;
        }
        info!(trigger_id = %id, "trigger disabled");
        Ok((trigger, true))
    }

    pub async fn get_by_webhook_id(&self, webhook_id: &str) -> Result<Option<Trigger>> {
        self.triggers.get_by_webhook_id(webhook_id).await
    }

    pub async fn reset_failure_count(&self, id: Uuid) -> Result<()> {
        let trigger = self
            .triggers
            .get(id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("trigger {id}")))?;
        self.triggers
            .update_execution_tracking(
                id,
                trigger.last_execution_at.unwrap_or(trigger.updated_at),
                0,
            )
            .await
    }

    pub async fn safety_status(&self, id: Uuid) -> Result<TriggerSafetyStatus> {
        let trigger = self
            .triggers
            .get(id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("trigger {id}")))?;

        let schedule_info = if trigger.kind() == TriggerKind::Cron {
            self.schedules.info(id).await.unwrap_or_default()
        } else {
            None
        };

        Ok(TriggerSafetyStatus {
            trigger_id: trigger.id,
            is_active: trigger.is_active,
            last_execution_at: trigger.last_execution_at,
            consecutive_failures: trigger.consecutive_failures,
            failure_threshold: trigger.failure_threshold,
            should_disable_due_to_failures: trigger.should_disable_due_to_failures(),
            schedule_info,
        })
    }

    // ========================================================================
    // Execution analytics passthroughs
    // ========================================================================

    pub async fn execution_history(
        &self,
        trigger_id: Uuid,
        filter: ExecutionFilter,
    ) -> Result<ExecutionPage> {
        self.triggers.list_executions(trigger_id, filter).await
    }

    pub async fn execution_metrics(
        &self,
        trigger_id: Uuid,
        hours: i64,
    ) -> Result<ExecutionMetrics> {
        self.triggers.execution_metrics(trigger_id, hours).await
    }

    pub async fn execution_timeline(
        &self,
        trigger_id: Uuid,
        hours: i64,
        bucket_minutes: i64,
    ) -> Result<Vec<TimelineBucket>> {
        self.triggers
            .execution_timeline(trigger_id, hours, bucket_minutes)
            .await
    }

    // ========================================================================
    // Execution
    // ========================================================================

    async fn conditions_met(&self, trigger: &Trigger, event_data: &Value) -> bool {
        let has_conditions = trigger
            .conditions
            .as_object()
            .map(|o| !o.is_empty())
            .unwrap_or(!trigger.conditions.is_null());
        if !has_conditions {
            return true;
        }

        if let Some(evaluator) = &self.evaluator {
            match evaluator
                .evaluate(&trigger.conditions, event_data, trigger.id)
                .await
            {
                Ok(met) => return met,
                Err(e) => {
                    warn!(
                        trigger_id = %trigger.id,
                        error = %e,
                        "condition evaluator failed, falling back to simple rules"
                    );
                }
            }
        }

        evaluate_conditions(&trigger.conditions, event_data, self.error_policy)
    }

    /// Task parameters = trigger parameters ∪ trigger metadata ∪ optional
    /// extracted parameters (non-overriding, in that order of precedence).
    async fn build_task_parameters(&self, trigger: &Trigger, event_data: &Value) -> Value {
        let mut params: Map<String, Value> = trigger
            .task_parameters
            .as_object()
            .cloned()
            .unwrap_or_default();

        params.insert("trigger_id".into(), json!(trigger.id));
        params.insert("trigger_type".into(), json!(trigger.kind().as_str()));
        params.insert("trigger_name".into(), json!(trigger.name));
        params.insert("execution_time".into(), json!(Utc::now()));
        params.insert("trigger_data".into(), event_data.clone());

        if let Some(evaluator) = &self.evaluator {
            match evaluator.extract_parameters(event_data, trigger.id).await {
                Ok(Value::Object(extracted)) => {
                    for (key, value) in extracted {
                        params.entry(key).or_insert(value);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(trigger_id = %trigger.id, error = %e, "parameter extraction failed");
                }
            }
        }

        Value::Object(params)
    }

    async fn record(&self, execution: TriggerExecution) -> Result<TriggerExecution> {
        self.triggers.record_execution(execution).await
    }

    async fn record_launch_failure(
        &self,
        trigger: &Trigger,
        event_data: Value,
        elapsed_ms: i64,
        message: String,
    ) -> Result<TriggerExecution> {
        let execution = self
            .record(TriggerExecution::failure(
                trigger.id,
                &trigger.workspace_id,
                elapsed_ms,
                message,
                event_data,
            ))
            .await?;

        let failures = trigger.consecutive_failures + 1;
        self.triggers
            .update_execution_tracking(trigger.id, Utc::now(), failures)
            .await?;

        if failures >= trigger.failure_threshold {
            self.auto_disable(trigger.id, failures).await;
        }

        Ok(execution)
    }

    async fn auto_disable(&self, trigger_id: Uuid, failures: i32) {
        warn!(
            trigger_id = %trigger_id,
            consecutive_failures = failures,
            "disabling trigger after consecutive failures"
        );

        match self.disable_trigger(trigger_id).await {
            Ok((_, transitioned)) if transitioned => {
                let event = DomainEvent::trigger_auto_disabled(
                    trigger_id,
                    failures,
                    Utc::now(),
                    AUTO_DISABLE_REASON,
                );
                if let Err(e) = self.publisher.publish(event).await {
                    warn!(trigger_id = %trigger_id, error = %e, "auto-disable event not published");
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(trigger_id = %trigger_id, error = %e, "auto-disable failed");
            }
        }
    }

    async fn pause_schedule(&self, id: Uuid) {
        if let Err(e) = self.schedules.pause(id).await {
            warn!(trigger_id = %id, error = %e, "schedule pause failed");
        }
    }

    async fn unpause_schedule(&self, id: Uuid) {
        if let Err(e) = self.schedules.unpause(id).await {
            warn!(trigger_id = %id, error = %e, "schedule unpause failed");
        }
    }
}

#[async_trait]
impl TriggerExecutor for TriggerService {
    async fn execute_trigger(
        &self,
        trigger_id: Uuid,
        event_data: Value,
    ) -> Result<TriggerExecution> {
        let trigger = self
            .triggers
            .get(trigger_id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("trigger {trigger_id}")))?;

        if !trigger.is_active {
            warn!(trigger_id = %trigger_id, "attempted to execute inactive trigger");
            return self
                .record(TriggerExecution::failure(
                    trigger_id,
                    &trigger.workspace_id,
                    0,
                    "Trigger is inactive",
                    event_data,
                ))
                .await;
        }

        let started = Instant::now();

        // Conditions not met is a recorded skip, not a failure of the trigger
        if !self.conditions_met(&trigger, &event_data).await {
            info!(trigger_id = %trigger_id, "trigger conditions not met, skipping");
            return self
                .record(TriggerExecution::failure(
                    trigger_id,
                    &trigger.workspace_id,
                    started.elapsed().as_millis() as i64,
                    "Trigger conditions not met",
                    event_data,
                ))
                .await;
        }

        let parameters = self.build_task_parameters(&trigger, &event_data).await;
        let request = TaskRequest {
            agent_id: trigger.agent_id,
            description: if trigger.description.is_empty() {
                format!("Execution of trigger {}", trigger.name)
            } else {
                trigger.description.clone()
            },
            parameters,
            ctx: self.ctx.clone(),
            enable_agent_communication: false,
            requires_human_approval: false,
            budget_usd: None,
        };

        match self.launcher.create_and_start(request).await {
            Ok(task) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                info!(trigger_id = %trigger_id, task_id = %task.id, "trigger created task");

                let execution = self
                    .record(TriggerExecution::success(
                        trigger_id,
                        &trigger.workspace_id,
                        elapsed_ms,
                        Some(task.id),
                        event_data,
                    ))
                    .await?;

                self.triggers
                    .update_execution_tracking(trigger_id, Utc::now(), 0)
                    .await?;

                Ok(execution)
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                error!(trigger_id = %trigger_id, error = %e, "trigger execution failed");
                self.record_launch_failure(&trigger, event_data, elapsed_ms, e.to_string())
                    .await
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskStatus};
    use crate::traits::{TaskCreate, TaskPatch};
    use crate::trigger::{ExecutionStatus, TriggerSpec, WebhookType};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // In-memory collaborators
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MemTriggerStore {
        ctx_workspace: String,
        triggers: Mutex<HashMap<Uuid, Trigger>>,
        executions: Mutex<Vec<TriggerExecution>>,
    }

    impl MemTriggerStore {
        fn new(workspace: &str) -> Self {
            Self {
                ctx_workspace: workspace.to_string(),
                ..Default::default()
            }
        }

        fn executions_for(&self, trigger_id: Uuid) -> Vec<TriggerExecution> {
            self.executions
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.trigger_id == trigger_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl TriggerStore for MemTriggerStore {
        async fn create(&self, input: TriggerCreate) -> Result<Trigger> {
            input.validate()?;
            let now = Utc::now();
            let trigger = Trigger {
                id: Uuid::new_v4(),
                name: input.name.trim().to_string(),
                description: input.description,
                agent_id: input.agent_id,
                workspace_id: self.ctx_workspace.clone(),
                created_by: "user-1".to_string(),
                is_active: true,
                task_parameters: input.task_parameters,
                conditions: input.conditions,
                failure_threshold: input.failure_threshold.unwrap_or(5),
                consecutive_failures: 0,
                last_execution_at: None,
                created_at: now,
                updated_at: now,
                spec: input.spec,
            };
            self.triggers
                .lock()
                .unwrap()
                .insert(trigger.id, trigger.clone());
            Ok(trigger)
        }

        async fn get(&self, id: Uuid) -> Result<Option<Trigger>> {
            Ok(self.triggers.lock().unwrap().get(&id).cloned())
        }

        async fn update(&self, id: Uuid, update: TriggerUpdate) -> Result<Trigger> {
            let mut triggers = self.triggers.lock().unwrap();
            let trigger = triggers
                .get_mut(&id)
                .ok_or_else(|| PlatformError::not_found(format!("trigger {id}")))?;
            if let Some(name) = update.name {
                trigger.name = name;
            }
            if let Some(active) = update.is_active {
                trigger.is_active = active;
            }
            if let Some(threshold) = update.failure_threshold {
                trigger.failure_threshold = threshold;
            }
            if let (Some(expr), TriggerSpec::Cron { cron_expression, .. }) =
                (update.cron_expression, &mut trigger.spec)
            {
                *cron_expression = expr;
            }
            trigger.updated_at = Utc::now();
            Ok(trigger.clone())
        }

        async fn delete(&self, id: Uuid) -> Result<bool> {
            Ok(self.triggers.lock().unwrap().remove(&id).is_some())
        }

        async fn list(&self, _filter: TriggerFilter) -> Result<Vec<Trigger>> {
            Ok(self.triggers.lock().unwrap().values().cloned().collect())
        }

        async fn get_by_webhook_id(&self, webhook_id: &str) -> Result<Option<Trigger>> {
            Ok(self
                .triggers
                .lock()
                .unwrap()
                .values()
                .find(|t| t.webhook_id() == Some(webhook_id))
                .cloned())
        }

        async fn list_cron_due(
            &self,
            _now: chrono::DateTime<Utc>,
        ) -> Result<Vec<Trigger>> {
            Ok(Vec::new())
        }

        async fn update_execution_tracking(
            &self,
            id: Uuid,
            last_execution_at: chrono::DateTime<Utc>,
            consecutive_failures: i32,
        ) -> Result<()> {
            let mut triggers = self.triggers.lock().unwrap();
            let trigger = triggers
                .get_mut(&id)
                .ok_or_else(|| PlatformError::not_found(format!("trigger {id}")))?;
            trigger.last_execution_at = Some(last_execution_at);
            trigger.consecutive_failures = consecutive_failures;
            Ok(())
        }

        async fn record_execution(
            &self,
            execution: TriggerExecution,
        ) -> Result<TriggerExecution> {
            self.executions.lock().unwrap().push(execution.clone());
            Ok(execution)
        }

        async fn list_executions(
            &self,
            trigger_id: Uuid,
            _filter: ExecutionFilter,
        ) -> Result<ExecutionPage> {
            let executions = self.executions_for(trigger_id);
            let total = executions.len() as i64;
            Ok(ExecutionPage {
                executions,
                total,
                page: 1,
                page_size: 20,
                has_next: false,
            })
        }

        async fn execution_metrics(
            &self,
            trigger_id: Uuid,
            hours: i64,
        ) -> Result<ExecutionMetrics> {
            let executions = self.executions_for(trigger_id);
            let total = executions.len() as i64;
            let successful = executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Success)
                .count() as i64;
            Ok(ExecutionMetrics {
                trigger_id,
                window_hours: hours,
                total_executions: total,
                successful_executions: successful,
                failed_executions: total - successful,
                timeout_executions: 0,
                success_rate: 0.0,
                avg_execution_time_ms: None,
                min_execution_time_ms: None,
                max_execution_time_ms: None,
            })
        }

        async fn execution_timeline(
            &self,
            _trigger_id: Uuid,
            _hours: i64,
            _bucket_minutes: i64,
        ) -> Result<Vec<TimelineBucket>> {
            Ok(Vec::new())
        }
    }

    struct MemDirectory;

    #[async_trait]
    impl AgentDirectory for MemDirectory {
        async fn get(
            &self,
            agent_id: Uuid,
            _ctx: &RequestContext,
        ) -> Result<Option<crate::traits::AgentSummary>> {
            Ok(Some(crate::traits::AgentSummary {
                id: agent_id,
                name: "test-agent".to_string(),
                model_id: "gpt-4o".to_string(),
                instruction: String::new(),
                description: String::new(),
                tools_config: json!({}),
                planning: false,
            }))
        }
    }

    #[derive(Default)]
    struct MemLauncher {
        fail: AtomicBool,
        requests: Mutex<Vec<TaskRequest>>,
    }

    #[async_trait]
    impl TaskLauncher for MemLauncher {
        async fn create_and_start(&self, request: TaskRequest) -> Result<Task> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PlatformError::dependency("engine unavailable"));
            }
            let now = Utc::now();
            let task = Task {
                id: Uuid::new_v4(),
                agent_id: request.agent_id,
                workspace_id: request.ctx.workspace_id.clone(),
                created_by: request.ctx.user_id.clone(),
                description: request.description.clone(),
                parameters: request.parameters.clone(),
                status: TaskStatus::Running,
                result: None,
                error: None,
                started_at: Some(now),
                completed_at: None,
                execution_id: Some(format!("task-{}", Uuid::new_v4())),
                metadata: json!({}),
                created_at: now,
                updated_at: now,
            };
            self.requests.lock().unwrap().push(request);
            Ok(task)
        }
    }

    #[derive(Default)]
    struct MemScheduleManager {
        ops: Mutex<Vec<String>>,
    }

    impl MemScheduleManager {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScheduleManager for MemScheduleManager {
        async fn create(&self, id: Uuid, _expr: &str, _tz: &str) -> Result<()> {
            self.ops.lock().unwrap().push(format!("create:{id}"));
            Ok(())
        }
        async fn update(&self, id: Uuid, _expr: &str, _tz: &str) -> Result<()> {
            self.ops.lock().unwrap().push(format!("update:{id}"));
            Ok(())
        }
        async fn pause(&self, id: Uuid) -> Result<()> {
            self.ops.lock().unwrap().push(format!("pause:{id}"));
            Ok(())
        }
        async fn unpause(&self, id: Uuid) -> Result<()> {
            self.ops.lock().unwrap().push(format!("unpause:{id}"));
            Ok(())
        }
        async fn delete(&self, id: Uuid) -> Result<()> {
            self.ops.lock().unwrap().push(format!("delete:{id}"));
            Ok(())
        }
        async fn info(&self, _id: Uuid) -> Result<Option<ScheduleInfo>> {
            Ok(None)
        }
        async fn list_scheduled(&self) -> Result<Vec<Uuid>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct MemPublisher {
        events: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventPublisher for MemPublisher {
        async fn publish(&self, event: DomainEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    struct Harness {
        service: TriggerService,
        triggers: Arc<MemTriggerStore>,
        launcher: Arc<MemLauncher>,
        schedules: Arc<MemScheduleManager>,
        publisher: Arc<MemPublisher>,
    }

    fn harness() -> Harness {
        let triggers = Arc::new(MemTriggerStore::new("ws-1"));
        let launcher = Arc::new(MemLauncher::default());
        let schedules = Arc::new(MemScheduleManager::default());
        let publisher = Arc::new(MemPublisher::default());
        let service = TriggerService::new(
            triggers.clone(),
            Arc::new(MemDirectory),
            launcher.clone(),
            schedules.clone(),
            publisher.clone(),
            ConditionErrorPolicy::Permissive,
            RequestContext::new("ws-1", "user-1").unwrap(),
        );
        Harness {
            service,
            triggers,
            launcher,
            schedules,
            publisher,
        }
    }

    fn cron_create(threshold: Option<i32>) -> TriggerCreate {
        TriggerCreate {
            name: "Daily Report".to_string(),
            description: String::new(),
            agent_id: Uuid::new_v4(),
            task_parameters: json!({"report_type": "daily"}),
            conditions: json!({}),
            failure_threshold: threshold,
            spec: TriggerSpec::Cron {
                cron_expression: "0 9 * * 1-5".to_string(),
                timezone: "UTC".to_string(),
                next_run_time: None,
            },
        }
    }

    fn webhook_create(webhook_id: &str, conditions: Value, action: &str) -> TriggerCreate {
        TriggerCreate {
            name: format!("hook-{action}"),
            description: String::new(),
            agent_id: Uuid::new_v4(),
            task_parameters: json!({"action": action}),
            conditions,
            failure_threshold: None,
            spec: TriggerSpec::Webhook {
                webhook_id: webhook_id.to_string(),
                allowed_methods: vec!["POST".to_string()],
                webhook_type: WebhookType::Generic,
                validation_rules: json!({}),
                webhook_config: None,
            },
        }
    }

    // ------------------------------------------------------------------
    // Cron trigger lifecycle
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_cron_lifecycle() {
        let h = harness();

        let trigger = h.service.create_trigger(cron_create(None)).await.unwrap();
        assert!(trigger.is_active);
        assert_eq!(h.schedules.ops(), vec![format!("create:{}", trigger.id)]);

        // Execute: task created with merged parameters
        let execution = h
            .service
            .execute_trigger(
                trigger.id,
                json!({"execution_time": "2024-01-02T09:00:00Z", "source": "cron"}),
            )
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert!(execution.task_id.is_some());

        let requests = h.launcher.requests.lock().unwrap();
        let params = &requests[0].parameters;
        assert_eq!(params["report_type"], "daily");
        assert_eq!(params["trigger_type"], "cron");
        assert_eq!(params["trigger_id"], json!(trigger.id));
        assert_eq!(params["trigger_data"]["source"], "cron");
        drop(requests);

        // Disable pauses, enable resumes
        let (_, transitioned) = h.service.disable_trigger(trigger.id).await.unwrap();
        assert!(transitioned);
        h.service.enable_trigger(trigger.id).await.unwrap();
        let ops = h.schedules.ops();
        assert!(ops.contains(&format!("pause:{}", trigger.id)));
        assert!(ops.contains(&format!("unpause:{}", trigger.id)));

        // Delete removes the schedule before the row
        assert!(h.service.delete_trigger(trigger.id).await.unwrap());
        assert!(h.schedules.ops().contains(&format!("delete:{}", trigger.id)));
        assert!(h.service.get_trigger(trigger.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_trigger_records_skip() {
        let h = harness();
        let trigger = h.service.create_trigger(cron_create(None)).await.unwrap();
        h.service.disable_trigger(trigger.id).await.unwrap();

        let execution = h
            .service
            .execute_trigger(trigger.id, json!({}))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error_message.as_deref(), Some("Trigger is inactive"));
        assert!(h.launcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_unknown_trigger_is_not_found() {
        let h = harness();
        let err = h
            .service
            .execute_trigger(Uuid::new_v4(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    // ------------------------------------------------------------------
    // Webhook multi-trigger dispatch (conditions decide which one fires)
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_conditional_dispatch() {
        let h = harness();
        let deploy = h
            .service
            .create_trigger(webhook_create(
                "hook-1",
                json!({"field_matches": {"body.branch": "main"}}),
                "deploy",
            ))
            .await
            .unwrap();
        let notify = h
            .service
            .create_trigger(webhook_create(
                "hook-1",
                json!({"field_matches": {"body.branch": "develop"}}),
                "notify",
            ))
            .await
            .unwrap();

        let event = json!({"body": {"ref": "refs/heads/main", "branch": "main"}});
        let first = h
            .service
            .execute_trigger(deploy.id, event.clone())
            .await
            .unwrap();
        let second = h.service.execute_trigger(notify.id, event).await.unwrap();

        // Exactly one task, from the matching trigger
        assert_eq!(first.status, ExecutionStatus::Success);
        assert_eq!(second.status, ExecutionStatus::Failed);
        assert_eq!(
            second.error_message.as_deref(),
            Some("Trigger conditions not met")
        );

        let requests = h.launcher.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].parameters["action"], "deploy");

        // The skipped trigger still has its execution recorded
        assert_eq!(h.triggers.executions_for(notify.id).len(), 1);
    }

    // ------------------------------------------------------------------
    // Consecutive-failure auto-disable
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_auto_disable_after_threshold() {
        let h = harness();
        let trigger = h.service.create_trigger(cron_create(Some(3))).await.unwrap();

        h.launcher.fail.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            let execution = h
                .service
                .execute_trigger(trigger.id, json!({}))
                .await
                .unwrap();
            assert_eq!(execution.status, ExecutionStatus::Failed);
        }

        let after = h.service.get_trigger(trigger.id).await.unwrap().unwrap();
        assert!(!after.is_active);
        assert_eq!(after.consecutive_failures, 3);

        // auto_disabled published exactly once, with the documented reason
        let events = h.publisher.events.lock().unwrap();
        let disabled: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == "trigger.auto_disabled")
            .collect();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].data["reason"], AUTO_DISABLE_REASON);
        assert_eq!(disabled[0].data["consecutive_failures"], 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let h = harness();
        let trigger = h.service.create_trigger(cron_create(Some(5))).await.unwrap();

        h.launcher.fail.store(true, Ordering::SeqCst);
        h.service
            .execute_trigger(trigger.id, json!({}))
            .await
            .unwrap();
        h.launcher.fail.store(false, Ordering::SeqCst);
        h.service
            .execute_trigger(trigger.id, json!({}))
            .await
            .unwrap();

        let after = h.service.get_trigger(trigger.id).await.unwrap().unwrap();
        assert_eq!(after.consecutive_failures, 0);
        assert!(after.is_active);
        assert!(after.last_execution_at.is_some());
    }

    #[tokio::test]
    async fn test_disable_is_idempotent() {
        let h = harness();
        let trigger = h.service.create_trigger(cron_create(None)).await.unwrap();

        let (_, first) = h.service.disable_trigger(trigger.id).await.unwrap();
        let (after, second) = h.service.disable_trigger(trigger.id).await.unwrap();
        assert!(first);
        assert!(!second);
        assert!(!after.is_active);
    }

    // ------------------------------------------------------------------
    // Condition evaluator fallback
    // ------------------------------------------------------------------

    struct FailingEvaluator;

    #[async_trait]
    impl ConditionEvaluator for FailingEvaluator {
        async fn evaluate(&self, _: &Value, _: &Value, _: Uuid) -> Result<bool> {
            Err(PlatformError::dependency("llm evaluator down"))
        }
    }

    #[tokio::test]
    async fn test_evaluator_failure_falls_back_to_simple_rules() {
        let h = harness();
        let service = TriggerService::new(
            h.triggers.clone(),
            Arc::new(MemDirectory),
            h.launcher.clone(),
            h.schedules.clone(),
            h.publisher.clone(),
            ConditionErrorPolicy::Permissive,
            RequestContext::new("ws-1", "user-1").unwrap(),
        )
        .with_evaluator(Arc::new(FailingEvaluator));

        let trigger = service
            .create_trigger(webhook_create(
                "hook-2",
                json!({"field_matches": {"body.kind": "push"}}),
                "deploy",
            ))
            .await
            .unwrap();

        let execution = service
            .execute_trigger(trigger.id, json!({"body": {"kind": "push"}}))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let h = harness();
        let mut bad = cron_create(None);
        bad.name = String::new();
        assert!(matches!(
            h.service.create_trigger(bad).await,
            Err(PlatformError::Validation(_))
        ));
    }
}
