// Relay worker binary
//
// Runs the engine side of the platform: the workflow runner, the cron
// schedule manager (rehydrated from active triggers at boot), and the
// trigger<->schedule reconciler.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_core::traits::AgentDirectory;
use relay_core::Config;
use relay_storage::{Database, EventBus, PgTaskEventStore};
use relay_worker::{
    HttpAgentDirectory, HttpLlmClient, HttpToolClient, InProcessRunner,
    InProcessScheduleManager, Platform, ScheduleReconciler, WorkerActivities,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=debug,relay_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("relay-worker starting...");

    let config = Config::from_env().context("configuration")?;
    let db = Database::connect(&config)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("migrations")?;
    tracing::info!("connected to database");

    // Event fan-out: durable log + live broadcast
    let event_store = Arc::new(PgTaskEventStore::new(db.clone()));
    let bus = Arc::new(EventBus::new(event_store.clone()));

    // Collaborator clients
    let llm_base = std::env::var("LLM_GATEWAY_URL")
        .unwrap_or_else(|_| "http://localhost:8801".to_string());
    let llm_key = std::env::var("LLM_GATEWAY_API_KEY").ok();
    let llm = Arc::new(HttpLlmClient::new(llm_base, llm_key));

    let tools_base = std::env::var("TOOL_SERVER_URL")
        .unwrap_or_else(|_| "http://localhost:8802".to_string());
    let tools = Arc::new(HttpToolClient::new(tools_base));

    let agents_base = std::env::var("AGENT_SERVICE_URL")
        .unwrap_or_else(|_| "http://localhost:8803".to_string());
    let directory: Arc<dyn AgentDirectory> = Arc::new(HttpAgentDirectory::new(agents_base));

    // Engine surface
    let activities = Arc::new(WorkerActivities::new(
        directory.clone(),
        llm,
        tools,
        bus.clone(),
    ));
    let runner = Arc::new(InProcessRunner::new(
        activities,
        db.clone(),
        config.workflow_max_concurrent_workflows,
    ));
    let schedules = Arc::new(InProcessScheduleManager::new());

    let platform = Platform::new(
        db.clone(),
        event_store,
        bus,
        runner.clone(),
        schedules.clone(),
        directory,
        &config,
    );
    schedules.bind_executor(Arc::new(platform.clone())).await;

    // Rehydrate schedules for active cron triggers, then keep them
    // reconciled in the background
    let reconciler = ScheduleReconciler::new(db, schedules.clone());
    if let Err(e) = reconciler.sweep().await {
        tracing::warn!(error = %e, "initial schedule sweep failed");
    }
    tokio::spawn(reconciler.run());

    tracing::info!(
        engine_url = %config.workflow_engine_url,
        namespace = %config.workflow_namespace,
        task_queue = %config.workflow_task_queue_tasks,
        trigger_queue = %config.workflow_task_queue_triggers,
        max_activities = config.workflow_max_concurrent_activities,
        "worker ready (in-process engine mode)"
    );

    tokio::signal::ctrl_c()
        .await
        .context("signal handler failed")?;
    tracing::info!("shutting down");
    runner.shutdown().await;

    Ok(())
}
