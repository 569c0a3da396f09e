// Relay API server
//
// HTTP surface of the platform: trigger management, agent tasks (including
// SSE event streams), public webhook ingest, and the A2A JSON-RPC adapter.
// The workflow runner and schedule manager run in-process here as well, so a
// single binary serves a complete installation; a separate relay-worker
// deployment takes the engine side when scaled out.

mod a2a;
mod auth;
mod error;
mod tasks;
mod triggers;
mod webhooks;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use relay_core::traits::AgentDirectory;
use relay_core::Config;
use relay_storage::{Database, EventBus, PgTaskEventStore};
use relay_worker::{
    HttpAgentDirectory, HttpLlmClient, HttpToolClient, InProcessRunner,
    InProcessScheduleManager, Platform, ScheduleReconciler, WorkerActivities,
};

use auth::AuthVerifier;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        triggers::create_trigger,
        triggers::list_triggers,
        triggers::get_trigger,
        triggers::update_trigger,
        triggers::delete_trigger,
        triggers::enable_trigger,
        triggers::disable_trigger,
        triggers::list_executions,
        triggers::trigger_status,
        triggers::trigger_metrics,
        triggers::trigger_timeline,
        triggers::triggers_health,
        tasks::create_task_stream,
        tasks::create_task_sync,
        tasks::list_tasks,
        tasks::get_task,
        tasks::task_status,
        tasks::cancel_task,
        tasks::pause_task,
        tasks::resume_task,
        tasks::list_events,
        tasks::stream_events,
    ),
    components(
        schemas(
            relay_core::Trigger,
            relay_core::TriggerCreate,
            relay_core::TriggerUpdate,
            relay_core::TriggerSpec,
            relay_core::TriggerKind,
            relay_core::WebhookType,
            relay_core::ExecutionStatus,
            relay_core::TriggerExecution,
            relay_core::Task,
            relay_core::TaskStatus,
            relay_core::TaskEvent,
            triggers::ListTriggersParams,
            triggers::ExecutionsParams,
            tasks::CreateTaskRequest,
            tasks::ListTasksParams,
        )
    ),
    tags(
        (name = "triggers", description = "Trigger management endpoints"),
        (name = "tasks", description = "Agent task endpoints"),
    ),
    info(
        title = "Relay API",
        version = "0.3.0",
        description = "Trigger-driven agent task orchestration",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_api=debug,relay_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("relay-api starting...");

    let config = Config::from_env().context("configuration")?;
    let db = Database::connect(&config)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("migrations")?;
    tracing::info!("connected to database");

    // Event fan-out
    let event_store = Arc::new(PgTaskEventStore::new(db.clone()));
    let bus = Arc::new(EventBus::new(event_store.clone()));

    // Collaborator clients
    let llm_base = std::env::var("LLM_GATEWAY_URL")
        .unwrap_or_else(|_| "http://localhost:8801".to_string());
    let llm = Arc::new(HttpLlmClient::new(
        llm_base,
        std::env::var("LLM_GATEWAY_API_KEY").ok(),
    ));
    let tools = Arc::new(HttpToolClient::new(
        std::env::var("TOOL_SERVER_URL").unwrap_or_else(|_| "http://localhost:8802".to_string()),
    ));
    let directory: Arc<dyn AgentDirectory> = Arc::new(HttpAgentDirectory::new(
        std::env::var("AGENT_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8803".to_string()),
    ));

    // Engine surface (in-process runner + schedule manager)
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
        runner,
        schedules.clone(),
        directory,
        &config,
    );
    schedules.bind_executor(Arc::new(platform.clone())).await;
    tokio::spawn(ScheduleReconciler::new(db, schedules).run());

    // Context extraction at the edge
    let verifier = Arc::new(AuthVerifier::from_config(&config).context("auth configuration")?);

    let triggers_state = triggers::AppState {
        platform: platform.clone(),
        auth: verifier.clone(),
    };
    let tasks_state = tasks::AppState {
        platform: platform.clone(),
        auth: verifier.clone(),
    };
    let webhooks_state = webhooks::AppState {
        platform: platform.clone(),
    };
    let a2a_state = a2a::AppState {
        platform,
        auth: verifier,
    };

    let app = Router::new()
        .route("/health", get(health))
        .merge(triggers::routes(triggers_state))
        .merge(tasks::routes(tasks_state))
        .merge(webhooks::routes(webhooks_state))
        .merge(a2a::routes(a2a_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
