// Trigger domain model
//
// Decision: a trigger is a shared header plus a tagged variant (cron vs
// webhook), not an inheritance tree. Persistence flattens it into one wide
// row with a `kind` discriminator; the API wire format flattens the variant
// into the object with a `trigger_type` tag.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PlatformError, Result};

/// Default consecutive-failure threshold before auto-disable
pub const DEFAULT_FAILURE_THRESHOLD: i32 = 5;

/// HTTP methods a webhook trigger may allow
pub const VALID_HTTP_METHODS: [&str; 7] =
    ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

// ============================================================================
// Enums
// ============================================================================

/// Trigger discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Cron,
    Webhook,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Cron => "cron",
            TriggerKind::Webhook => "webhook",
        }
    }
}

impl FromStr for TriggerKind {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cron" => Ok(TriggerKind::Cron),
            "webhook" => Ok(TriggerKind::Webhook),
            other => Err(PlatformError::validation(format!(
                "unknown trigger type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Webhook payload dialects with dedicated parsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum WebhookType {
    Generic,
    Telegram,
    Slack,
    Github,
    Discord,
    Stripe,
}

impl WebhookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookType::Generic => "generic",
            WebhookType::Telegram => "telegram",
            WebhookType::Slack => "slack",
            WebhookType::Github => "github",
            WebhookType::Discord => "discord",
            WebhookType::Stripe => "stripe",
        }
    }
}

impl FromStr for WebhookType {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "generic" => Ok(WebhookType::Generic),
            "telegram" => Ok(WebhookType::Telegram),
            "slack" => Ok(WebhookType::Slack),
            "github" => Ok(WebhookType::Github),
            "discord" => Ok(WebhookType::Discord),
            "stripe" => Ok(WebhookType::Stripe),
            other => Err(PlatformError::validation(format!(
                "unknown webhook type: {other}"
            ))),
        }
    }
}

/// Outcome of a single trigger execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "timeout" => Ok(ExecutionStatus::Timeout),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(PlatformError::validation(format!(
                "unknown execution status: {other}"
            ))),
        }
    }
}

// ============================================================================
// Trigger
// ============================================================================

/// Type-specific half of a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "trigger_type", rename_all = "lowercase")]
pub enum TriggerSpec {
    Cron {
        cron_expression: String,
        timezone: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_run_time: Option<DateTime<Utc>>,
    },
    Webhook {
        webhook_id: String,
        allowed_methods: Vec<String>,
        webhook_type: WebhookType,
        #[serde(default)]
        validation_rules: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webhook_config: Option<Value>,
    },
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Cron { .. } => TriggerKind::Cron,
            TriggerSpec::Webhook { .. } => TriggerKind::Webhook,
        }
    }
}

/// A rule that creates an agent task in response to a stimulus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Trigger {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agent_id: Uuid,
    pub workspace_id: String,
    pub created_by: String,
    pub is_active: bool,
    #[serde(default)]
    pub task_parameters: Value,
    #[serde(default)]
    pub conditions: Value,
    pub failure_threshold: i32,
    pub consecutive_failures: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub spec: TriggerSpec,
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        self.spec.kind()
    }

    /// Consecutive failures reached the configured threshold
    pub fn should_disable_due_to_failures(&self) -> bool {
        self.consecutive_failures >= self.failure_threshold
    }

    /// Reset the failure counter and stamp the execution time
    pub fn record_execution_success(&mut self, now: DateTime<Utc>) {
        self.last_execution_at = Some(now);
        self.consecutive_failures = 0;
        self.updated_at = now;
    }

    /// Bump the failure counter and stamp the execution time
    pub fn record_execution_failure(&mut self, now: DateTime<Utc>) {
        self.last_execution_at = Some(now);
        self.consecutive_failures += 1;
        self.updated_at = now;
    }

    /// Webhook id, when this is a webhook trigger
    pub fn webhook_id(&self) -> Option<&str> {
        match &self.spec {
            TriggerSpec::Webhook { webhook_id, .. } => Some(webhook_id),
            _ => None,
        }
    }

    /// Cron expression + timezone, when this is a cron trigger
    pub fn cron_schedule(&self) -> Option<(&str, &str)> {
        match &self.spec {
            TriggerSpec::Cron {
                cron_expression,
                timezone,
                ..
            } => Some((cron_expression, timezone)),
            _ => None,
        }
    }
}

// ============================================================================
// Create / update inputs
// ============================================================================

/// Input for creating a trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TriggerCreate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agent_id: Uuid,
    #[serde(default = "default_object")]
    pub task_parameters: Value,
    #[serde(default = "default_object")]
    pub conditions: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
    #[serde(flatten)]
    pub spec: TriggerSpec,
}

fn default_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl TriggerCreate {
    /// Fail-fast validation of the common header and the type-specific half
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(PlatformError::validation("trigger name cannot be empty"));
        }
        if name.len() > 255 {
            return Err(PlatformError::validation(
                "trigger name cannot exceed 255 characters",
            ));
        }
        if self.description.len() > 1000 {
            return Err(PlatformError::validation(
                "trigger description cannot exceed 1000 characters",
            ));
        }
        if let Some(threshold) = self.failure_threshold {
            if !(1..=100).contains(&threshold) {
                return Err(PlatformError::validation(
                    "failure_threshold must be between 1 and 100",
                ));
            }
        }

        match &self.spec {
            TriggerSpec::Cron {
                cron_expression,
                timezone,
                ..
            } => {
                validate_cron_expression(cron_expression)?;
                validate_timezone(timezone)?;
            }
            TriggerSpec::Webhook {
                webhook_id,
                allowed_methods,
                ..
            } => {
                validate_webhook_id(webhook_id)?;
                normalize_methods(allowed_methods)?;
            }
        }

        Ok(())
    }
}

/// Partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TriggerUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub task_parameters: Option<Value>,
    pub conditions: Option<Value>,
    pub failure_threshold: Option<i32>,
    // Cron fields
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    // Webhook fields
    pub allowed_methods: Option<Vec<String>>,
    pub validation_rules: Option<Value>,
    pub webhook_config: Option<Value>,
}

impl TriggerUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(PlatformError::validation("trigger name cannot be empty"));
            }
            if name.trim().len() > 255 {
                return Err(PlatformError::validation(
                    "trigger name cannot exceed 255 characters",
                ));
            }
        }
        if let Some(description) = &self.description {
            if description.len() > 1000 {
                return Err(PlatformError::validation(
                    "trigger description cannot exceed 1000 characters",
                ));
            }
        }
        if let Some(threshold) = self.failure_threshold {
            if !(1..=100).contains(&threshold) {
                return Err(PlatformError::validation(
                    "failure_threshold must be between 1 and 100",
                ));
            }
        }
        if let Some(expr) = &self.cron_expression {
            validate_cron_expression(expr)?;
        }
        if let Some(tz) = &self.timezone {
            validate_timezone(tz)?;
        }
        if let Some(methods) = &self.allowed_methods {
            normalize_methods(methods)?;
        }
        Ok(())
    }
}

// ============================================================================
// Validation helpers
// ============================================================================

/// Accepts 5-field (minute-resolution) and 6-field (with seconds) expressions.
/// The `cron` crate wants a seconds column, so 5-field input is normalized by
/// prefixing `0`.
pub fn normalize_cron_expression(expr: &str) -> Result<String> {
    let trimmed = expr.trim();
    let fields = trimmed.split_whitespace().count();
    match fields {
        5 => Ok(format!("0 {trimmed}")),
        6 => Ok(trimmed.to_string()),
        _ => Err(PlatformError::validation(
            "cron expression must have 5 or 6 fields",
        )),
    }
}

pub fn validate_cron_expression(expr: &str) -> Result<()> {
    let normalized = normalize_cron_expression(expr)?;
    cron::Schedule::from_str(&normalized)
        .map_err(|e| PlatformError::validation(format!("invalid cron expression: {e}")))?;
    Ok(())
}

pub fn validate_timezone(tz: &str) -> Result<chrono_tz::Tz> {
    if tz.trim().is_empty() {
        return Err(PlatformError::validation("timezone cannot be empty"));
    }
    tz.trim()
        .parse::<chrono_tz::Tz>()
        .map_err(|_| PlatformError::validation(format!("unknown timezone: {tz}")))
}

pub fn validate_webhook_id(webhook_id: &str) -> Result<()> {
    let id = webhook_id.trim();
    if id.is_empty() {
        return Err(PlatformError::validation("webhook_id cannot be empty"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PlatformError::validation(
            "webhook_id must be URL-safe (alphanumeric, '-' or '_')",
        ));
    }
    Ok(())
}

/// Upper-case and validate the allowed-method list
pub fn normalize_methods(methods: &[String]) -> Result<Vec<String>> {
    if methods.is_empty() {
        return Err(PlatformError::validation(
            "at least one HTTP method must be allowed",
        ));
    }
    methods
        .iter()
        .map(|m| {
            let upper = m.to_uppercase();
            if VALID_HTTP_METHODS.contains(&upper.as_str()) {
                Ok(upper)
            } else {
                Err(PlatformError::validation(format!(
                    "invalid HTTP method: {m}"
                )))
            }
        })
        .collect()
}

// ============================================================================
// TriggerExecution
// ============================================================================

/// Append-only record of a single trigger execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TriggerExecution {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub workspace_id: String,
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    pub execution_time_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub trigger_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl TriggerExecution {
    /// Successful execution; the invariant `success ⇒ no error_message` holds
    /// by construction.
    pub fn success(
        trigger_id: Uuid,
        workspace_id: impl Into<String>,
        execution_time_ms: i64,
        task_id: Option<Uuid>,
        trigger_data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            workspace_id: workspace_id.into(),
            executed_at: Utc::now(),
            status: ExecutionStatus::Success,
            task_id,
            execution_time_ms: execution_time_ms.max(0),
            error_message: None,
            trigger_data,
            workflow_id: None,
            run_id: None,
        }
    }

    /// Failed (or skipped) execution with a server-side error message
    pub fn failure(
        trigger_id: Uuid,
        workspace_id: impl Into<String>,
        execution_time_ms: i64,
        error_message: impl Into<String>,
        trigger_data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            workspace_id: workspace_id.into(),
            executed_at: Utc::now(),
            status: ExecutionStatus::Failed,
            task_id: None,
            execution_time_ms: execution_time_ms.max(0),
            error_message: Some(error_message.into()),
            trigger_data,
            workflow_id: None,
            run_id: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cron_create() -> TriggerCreate {
        TriggerCreate {
            name: "Daily Report".to_string(),
            description: String::new(),
            agent_id: Uuid::new_v4(),
            task_parameters: json!({"report_type": "daily"}),
            conditions: json!({}),
            failure_threshold: None,
            spec: TriggerSpec::Cron {
                cron_expression: "0 9 * * 1-5".to_string(),
                timezone: "UTC".to_string(),
                next_run_time: None,
            },
        }
    }

    fn webhook_create() -> TriggerCreate {
        TriggerCreate {
            name: "GitHub Push".to_string(),
            description: String::new(),
            agent_id: Uuid::new_v4(),
            task_parameters: json!({}),
            conditions: json!({}),
            failure_threshold: None,
            spec: TriggerSpec::Webhook {
                webhook_id: "gh-push-1".to_string(),
                allowed_methods: vec!["POST".to_string()],
                webhook_type: WebhookType::Github,
                validation_rules: json!({}),
                webhook_config: None,
            },
        }
    }

    #[test]
    fn test_valid_cron_create() {
        assert!(cron_create().validate().is_ok());
    }

    #[test]
    fn test_cron_expression_field_counts() {
        assert!(validate_cron_expression("0 9 * * 1-5").is_ok());
        assert!(validate_cron_expression("30 0 9 * * 1-5").is_ok());
        assert!(validate_cron_expression("0 9 * *").is_err());
        assert!(validate_cron_expression("").is_err());
    }

    #[test]
    fn test_cron_expression_rejects_garbage() {
        assert!(validate_cron_expression("a b c d e").is_err());
        assert!(validate_cron_expression("99 99 * * *").is_err());
    }

    #[test]
    fn test_timezone_validation() {
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("America/New_York").is_ok());
        assert!(validate_timezone("Not/AZone").is_err());
        assert!(validate_timezone("").is_err());
    }

    #[test]
    fn test_name_bounds() {
        let mut create = cron_create();
        create.name = "  ".to_string();
        assert!(create.validate().is_err());

        create.name = "x".repeat(256);
        assert!(create.validate().is_err());
    }

    #[test]
    fn test_failure_threshold_bounds() {
        let mut create = cron_create();
        create.failure_threshold = Some(0);
        assert!(create.validate().is_err());
        create.failure_threshold = Some(101);
        assert!(create.validate().is_err());
        create.failure_threshold = Some(100);
        assert!(create.validate().is_ok());
    }

    #[test]
    fn test_webhook_method_normalization() {
        let methods = normalize_methods(&["post".to_string(), "Get".to_string()]).unwrap();
        assert_eq!(methods, vec!["POST", "GET"]);

        assert!(normalize_methods(&[]).is_err());
        assert!(normalize_methods(&["FETCH".to_string()]).is_err());
    }

    #[test]
    fn test_webhook_id_url_safety() {
        assert!(validate_webhook_id("gh-push_1").is_ok());
        assert!(validate_webhook_id("has space").is_err());
        assert!(validate_webhook_id("slash/id").is_err());
    }

    #[test]
    fn test_webhook_create_valid() {
        assert!(webhook_create().validate().is_ok());
    }

    #[test]
    fn test_failure_tracking() {
        let mut trigger = Trigger {
            id: Uuid::new_v4(),
            name: "t".to_string(),
            description: String::new(),
            agent_id: Uuid::new_v4(),
            workspace_id: "ws-1".to_string(),
            created_by: "user-1".to_string(),
            is_active: true,
            task_parameters: json!({}),
            conditions: json!({}),
            failure_threshold: 3,
            consecutive_failures: 0,
            last_execution_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            spec: TriggerSpec::Cron {
                cron_expression: "0 9 * * *".to_string(),
                timezone: "UTC".to_string(),
                next_run_time: None,
            },
        };

        let now = Utc::now();
        trigger.record_execution_failure(now);
        trigger.record_execution_failure(now);
        assert!(!trigger.should_disable_due_to_failures());

        trigger.record_execution_failure(now);
        assert!(trigger.should_disable_due_to_failures());

        trigger.record_execution_success(now);
        assert_eq!(trigger.consecutive_failures, 0);
        assert!(!trigger.should_disable_due_to_failures());
        assert_eq!(trigger.last_execution_at, Some(now));
    }

    #[test]
    fn test_trigger_spec_wire_tag() {
        let trigger = webhook_create();
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["trigger_type"], "webhook");
        assert_eq!(json["webhook_id"], "gh-push-1");

        let json = serde_json::to_value(cron_create()).unwrap();
        assert_eq!(json["trigger_type"], "cron");
        assert_eq!(json["cron_expression"], "0 9 * * 1-5");
    }

    #[test]
    fn test_execution_success_has_no_error() {
        let exec = TriggerExecution::success(Uuid::new_v4(), "ws-1", 42, None, json!({}));
        assert_eq!(exec.status, ExecutionStatus::Success);
        assert!(exec.error_message.is_none());
    }
}
