// Platform composition root
//
// Holds the shared singletons (database, event bus, runner, schedule
// manager, collaborator clients) and builds the context-bound policy
// services per request or per firing. It is also the context-free trigger
// executor: a cron firing or webhook only carries a trigger id, so the
// workspace context is derived from the trigger row itself before any
// scoped store is constructed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use relay_core::conditions::ConditionErrorPolicy;
use relay_core::error::{PlatformError, Result};
use relay_core::task_service::{OrchestratorDefaults, TaskOrchestrator};
use relay_core::traits::{
    AgentDirectory, ScheduleManager, TaskEventStore, TriggerExecutor,
};
use relay_core::trigger::TriggerExecution;
use relay_core::trigger_service::TriggerService;
use relay_core::workflow::WorkflowRunner;
use relay_core::{Config, RequestContext};
use relay_storage::{lookup_trigger, Database, EventBus, PgTaskStore, PgTriggerStore};

#[derive(Clone)]
pub struct Platform {
    db: Database,
    events: Arc<dyn TaskEventStore>,
    bus: Arc<EventBus>,
    runner: Arc<dyn WorkflowRunner>,
    schedules: Arc<dyn ScheduleManager>,
    directory: Arc<dyn AgentDirectory>,
    defaults: OrchestratorDefaults,
    error_policy: ConditionErrorPolicy,
}

impl Platform {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        events: Arc<dyn TaskEventStore>,
        bus: Arc<EventBus>,
        runner: Arc<dyn WorkflowRunner>,
        schedules: Arc<dyn ScheduleManager>,
        directory: Arc<dyn AgentDirectory>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            events,
            bus,
            runner,
            schedules,
            directory,
            defaults: OrchestratorDefaults {
                default_budget_usd: config.default_budget_usd,
                max_iterations: config.max_iterations,
            },
            error_policy: config.condition_error_policy,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn runner(&self) -> Arc<dyn WorkflowRunner> {
        self.runner.clone()
    }

    pub fn schedules(&self) -> Arc<dyn ScheduleManager> {
        self.schedules.clone()
    }

    pub fn directory(&self) -> Arc<dyn AgentDirectory> {
        self.directory.clone()
    }

    /// Task orchestrator bound to a workspace context
    pub fn task_orchestrator(&self, ctx: RequestContext) -> Arc<TaskOrchestrator> {
        Arc::new(TaskOrchestrator::new(
            Arc::new(PgTaskStore::new(self.db.clone(), ctx.clone())),
            self.events.clone(),
            self.directory.clone(),
            self.runner.clone(),
            self.bus.clone(),
            self.defaults.clone(),
            ctx,
        ))
    }

    /// Trigger service bound to a workspace context
    pub fn trigger_service(&self, ctx: RequestContext) -> Arc<TriggerService> {
        Arc::new(TriggerService::new(
            Arc::new(PgTriggerStore::new(self.db.clone(), ctx.clone())),
            self.directory.clone(),
            self.task_orchestrator(ctx.clone()),
            self.schedules.clone(),
            self.bus.clone(),
            self.error_policy,
            ctx,
        ))
    }
}

#[async_trait]
impl TriggerExecutor for Platform {
    /// Context-free dispatch: resolve the trigger, derive the owning
    /// workspace from its row, and execute through a scoped service.
    async fn execute_trigger(
        &self,
        trigger_id: Uuid,
        event_data: Value,
    ) -> Result<TriggerExecution> {
        let trigger = lookup_trigger(&self.db, trigger_id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("trigger {trigger_id}")))?;

        let ctx = RequestContext::new(trigger.workspace_id.clone(), trigger.created_by.clone())?;
        self.trigger_service(ctx)
            .execute_trigger(trigger_id, event_data)
            .await
    }
}
