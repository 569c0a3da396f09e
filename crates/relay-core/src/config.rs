// Environment configuration
//
// Binaries call `dotenvy::dotenv()` before `Config::from_env()`; unparseable
// numeric values fall back to their documented defaults.

use std::env;

use crate::conditions::ConditionErrorPolicy;
use crate::error::{PlatformError, Result};

/// Default engine queue for agent task workflows
pub const DEFAULT_TASK_QUEUE_TASKS: &str = "agent-tasks";

/// Default engine queue for trigger execution workflows
pub const DEFAULT_TASK_QUEUE_TRIGGERS: &str = "trigger-execution-queue";

#[derive(Debug, Clone)]
pub struct Config {
    // Persistence
    pub db_url: String,
    pub db_pool_size: u32,
    pub db_max_overflow: u32,
    pub db_echo: bool,

    // Workflow engine
    pub workflow_engine_url: String,
    pub workflow_namespace: String,
    pub workflow_task_queue_tasks: String,
    pub workflow_task_queue_triggers: String,
    pub workflow_max_concurrent_activities: usize,
    pub workflow_max_concurrent_workflows: usize,

    // Event bus
    pub broker_url: Option<String>,

    // JWT verification inputs
    pub auth_jwks_b64: Option<String>,
    pub auth_issuer: Option<String>,
    pub auth_audience: Option<String>,

    // Webhook URL rendering
    pub webhook_base_url: String,

    // Workflow limits
    pub default_budget_usd: f64,
    pub budget_warn_at: f64,
    pub max_iterations: u32,

    // Trigger condition evaluation
    pub condition_error_policy: ConditionErrorPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let db_url = env::var("DB_URL")
            .map_err(|_| PlatformError::validation("DB_URL environment variable required"))?;

        Ok(Self {
            db_url,
            db_pool_size: parse_env("DB_POOL_SIZE", 10),
            db_max_overflow: parse_env("DB_MAX_OVERFLOW", 5),
            db_echo: parse_env("DB_ECHO", false),

            workflow_engine_url: env::var("WORKFLOW_ENGINE_URL")
                .unwrap_or_else(|_| "http://localhost:7233".to_string()),
            workflow_namespace: env::var("WORKFLOW_NAMESPACE")
                .unwrap_or_else(|_| "default".to_string()),
            workflow_task_queue_tasks: env::var("WORKFLOW_TASK_QUEUE_TASKS")
                .unwrap_or_else(|_| DEFAULT_TASK_QUEUE_TASKS.to_string()),
            workflow_task_queue_triggers: env::var("WORKFLOW_TASK_QUEUE_TRIGGERS")
                .unwrap_or_else(|_| DEFAULT_TASK_QUEUE_TRIGGERS.to_string()),
            workflow_max_concurrent_activities: parse_env("WORKFLOW_MAX_CONCURRENT_ACTIVITIES", 100),
            workflow_max_concurrent_workflows: parse_env("WORKFLOW_MAX_CONCURRENT_WORKFLOWS", 100),

            broker_url: env::var("BROKER_URL").ok(),

            auth_jwks_b64: env::var("AUTH_JWKS_B64").ok(),
            auth_issuer: env::var("AUTH_ISSUER").ok(),
            auth_audience: env::var("AUTH_AUDIENCE").ok(),

            webhook_base_url: env::var("WEBHOOK_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),

            default_budget_usd: parse_env("DEFAULT_BUDGET_USD", 10.0),
            budget_warn_at: parse_env("BUDGET_WARN_AT", 0.8),
            max_iterations: parse_env("MAX_ITERATIONS", 50),

            condition_error_policy: ConditionErrorPolicy::from_env_value(
                &env::var("CONDITION_ERROR_POLICY").unwrap_or_default(),
            ),
        })
    }

    /// Render the public URL for a webhook id
    pub fn webhook_url(&self, webhook_id: &str) -> String {
        format!(
            "{}/webhooks/{}",
            self.webhook_base_url.trim_end_matches('/'),
            webhook_id
        )
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
