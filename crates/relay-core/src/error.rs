// Error taxonomy for the platform

use thiserror::Error;

/// Result type alias for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Errors that can occur across the platform
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Tenant/user context missing at a boundary
    #[error("workspace context missing")]
    MissingContext,

    /// Input violates a documented invariant
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity absent in this workspace
    #[error("{0} not found")]
    NotFound(String),

    /// Cross-workspace access; reported to clients identically to NotFound
    #[error("access denied")]
    AccessDenied,

    /// Required collaborator (DB, engine, broker, LLM, tool server) failed
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// Failure inside trigger execution
    #[error("trigger execution error: {0}")]
    TriggerExecution(String),

    /// Workflow cost limit reached
    #[error("budget exceeded: spent {spent:.4} of {budget:.4} USD")]
    BudgetExceeded { spent: f64, budget: f64 },

    /// Activity or workflow deadline reached
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PlatformError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        PlatformError::Validation(msg.into())
    }

    /// Create a not-found error; `what` names the entity, e.g. "trigger abc"
    pub fn not_found(what: impl Into<String>) -> Self {
        PlatformError::NotFound(what.into())
    }

    /// Create a dependency error
    pub fn dependency(msg: impl Into<String>) -> Self {
        PlatformError::Dependency(msg.into())
    }

    /// Create a trigger execution error
    pub fn trigger(msg: impl Into<String>) -> Self {
        PlatformError::TriggerExecution(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        PlatformError::Timeout(msg.into())
    }

    /// Short machine-readable tag, used in `workflow_failed` payloads
    pub fn error_type(&self) -> &'static str {
        match self {
            PlatformError::MissingContext => "missing_context",
            PlatformError::Validation(_) => "validation_error",
            PlatformError::NotFound(_) => "not_found",
            PlatformError::AccessDenied => "access_denied",
            PlatformError::Dependency(_) => "dependency_unavailable",
            PlatformError::TriggerExecution(_) => "trigger_execution_error",
            PlatformError::BudgetExceeded { .. } => "budget_exceeded",
            PlatformError::Timeout(_) => "timeout",
            PlatformError::Internal(_) => "internal_error",
        }
    }
}
