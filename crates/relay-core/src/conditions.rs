// Trigger condition evaluation
//
// The simple evaluator supports `field_matches` with dotted-path lookup into
// the event payload. An LLM-backed evaluator can be wired in through the
// ConditionEvaluator trait; when it fails, evaluation falls back to the
// simple rules.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

/// What to do when condition evaluation itself errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionErrorPolicy {
    /// Evaluation errors count as "conditions met" so events are not
    /// silently dropped
    #[default]
    Permissive,
    /// Evaluation errors count as "conditions not met"
    Strict,
}

impl ConditionErrorPolicy {
    pub fn from_env_value(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "strict" => ConditionErrorPolicy::Strict,
            _ => ConditionErrorPolicy::Permissive,
        }
    }

    fn on_error(&self) -> bool {
        matches!(self, ConditionErrorPolicy::Permissive)
    }
}

/// Pluggable evaluator (e.g. LLM-backed) consulted before the simple rules
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        conditions: &Value,
        event_data: &Value,
        trigger_id: Uuid,
    ) -> Result<bool>;

    /// Optional parameter extraction from the event payload; merged into the
    /// task parameters without overriding explicit keys
    async fn extract_parameters(&self, _event_data: &Value, _trigger_id: Uuid) -> Result<Value> {
        Ok(Value::Object(serde_json::Map::new()))
    }
}

/// Dotted-path lookup into nested JSON objects; None on any miss
pub fn lookup_path<'a>(data: &'a Value, field_path: &str) -> Option<&'a Value> {
    let mut current = data;
    for key in field_path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Evaluate the simple rule set against an event payload.
///
/// Empty or non-object conditions always pass. `field_matches` requires every
/// listed dotted path to equal its expected value; a missing path is a
/// non-match. Malformed rule shapes follow the error policy.
pub fn evaluate_conditions(
    conditions: &Value,
    event_data: &Value,
    policy: ConditionErrorPolicy,
) -> bool {
    let Some(rules) = conditions.as_object() else {
        if conditions.is_null() {
            return true;
        }
        warn!("conditions is not an object, applying error policy");
        return policy.on_error();
    };

    if rules.is_empty() {
        return true;
    }

    if let Some(field_matches) = rules.get("field_matches") {
        let Some(matches) = field_matches.as_object() else {
            warn!("field_matches is not an object, applying error policy");
            return policy.on_error();
        };
        for (field_path, expected) in matches {
            match lookup_path(event_data, field_path) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
    }

    true
}
