// Webhook ingest
//
// Public, unauthenticated endpoint: the webhook id is the capability. The
// pipeline is lookup -> active check -> method check -> validation rules ->
// type-specific parse -> execute. Several triggers may share one webhook id;
// each active trigger whose rules pass is executed, and its own conditions
// decide whether a task is created.
//
// Validation failures return an opaque message; the detailed cause stays in
// the server log so the endpoint cannot be probed.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{info, warn};

use relay_core::traits::TriggerExecutor;
use relay_core::trigger::{Trigger, TriggerSpec, WebhookType};
use relay_storage::lookup_webhook_triggers;
use relay_worker::Platform;

#[derive(Clone)]
pub struct AppState {
    pub platform: Platform,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/:webhook_id", any(handle_webhook))
        .with_state(state)
}

/// Inbound request view used by the validation and parsing steps
pub struct WebhookRequest {
    pub method: String,
    /// Lower-cased header names
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl WebhookRequest {
    fn from_parts(method: &Method, headers: &HeaderMap, body: &Bytes) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        Self {
            method: method.as_str().to_uppercase(),
            headers,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    fn body_json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = WebhookRequest::from_parts(&method, &headers, &body);

    let triggers = match lookup_webhook_triggers(state.platform.db(), &webhook_id).await {
        Ok(triggers) => triggers,
        Err(e) => {
            warn!(webhook_id, error = %e, "webhook lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    if triggers.is_empty() {
        return error_response(StatusCode::NOT_FOUND, "webhook not found");
    }

    let active: Vec<&Trigger> = triggers.iter().filter(|t| t.is_active).collect();
    if active.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "webhook is inactive");
    }

    let allowed: Vec<&Trigger> = active
        .iter()
        .copied()
        .filter(|t| method_allowed(t, &request.method))
        .collect();
    if allowed.is_empty() {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    // Per-trigger validation; the detailed cause stays server-side
    let mut candidates = Vec::new();
    for trigger in allowed {
        match apply_validation_rules(trigger, &request) {
            Ok(()) => candidates.push(trigger),
            Err(cause) => {
                warn!(webhook_id, trigger_id = %trigger.id, cause, "webhook validation failed");
            }
        }
    }
    if candidates.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "validation failed");
    }

    // Execute every candidate; conditions decide whether a task is created.
    // 200 means the webhook was handled, not that the agent task succeeded.
    let mut executed = 0usize;
    for trigger in candidates {
        let request_data = build_request_data(trigger, &request);
        match state
            .platform
            .execute_trigger(trigger.id, request_data)
            .await
        {
            Ok(execution) => {
                executed += 1;
                info!(
                    webhook_id,
                    trigger_id = %trigger.id,
                    status = execution.status.as_str(),
                    "webhook trigger executed"
                );
            }
            Err(e) => {
                warn!(webhook_id, trigger_id = %trigger.id, error = %e, "webhook execution failed");
            }
        }
    }

    if executed == 0 {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "webhook_id": webhook_id,
            "triggers_executed": executed,
        })),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// ============================================================================
// Pipeline steps (pure, tested directly)
// ============================================================================

pub fn method_allowed(trigger: &Trigger, method: &str) -> bool {
    match &trigger.spec {
        TriggerSpec::Webhook {
            allowed_methods, ..
        } => allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method)),
        _ => false,
    }
}

/// Apply the trigger's validation_rules. The Err carries the detailed,
/// server-side-only cause.
pub fn apply_validation_rules(trigger: &Trigger, request: &WebhookRequest) -> Result<(), String> {
    let TriggerSpec::Webhook {
        validation_rules, ..
    } = &trigger.spec
    else {
        return Err("not a webhook trigger".to_string());
    };

    let Some(rules) = validation_rules.as_object() else {
        return Ok(());
    };

    if let Some(required) = rules.get("required_headers").and_then(Value::as_array) {
        for header in required {
            let Some(name) = header.as_str() else {
                continue;
            };
            if !request.headers.contains_key(&name.to_lowercase()) {
                return Err(format!("missing required header {name}"));
            }
        }
    }

    if let Some(expected) = rules.get("content_type").and_then(Value::as_str) {
        let actual = request
            .headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or("");
        if !actual.contains(expected) {
            return Err(format!("content-type {actual:?} does not match {expected:?}"));
        }
    }

    if let Some("json") = rules.get("body_format").and_then(Value::as_str) {
        if request.body_json().is_none() {
            return Err("body is not valid JSON".to_string());
        }
    }

    Ok(())
}

/// Assemble the event payload handed to trigger execution. Parse failures
/// are non-fatal: the raw body is kept and `parse_error` is attached.
pub fn build_request_data(trigger: &Trigger, request: &WebhookRequest) -> Value {
    let body = request
        .body_json()
        .unwrap_or_else(|| Value::String(request.body.clone()));

    let mut data = json!({
        "source": "webhook",
        "method": request.method,
        "headers": request.headers,
        "body": body,
    });

    let webhook_type = match &trigger.spec {
        TriggerSpec::Webhook { webhook_type, .. } => *webhook_type,
        _ => WebhookType::Generic,
    };

    match parse_payload(webhook_type, request) {
        Ok(Some(parsed)) => {
            data["parsed"] = parsed;
        }
        Ok(None) => {}
        Err(parse_error) => {
            data["parse_error"] = json!(parse_error);
        }
    }

    data
}

/// Provider-specific extraction; `generic` passes the body through verbatim
/// (already present as `body`).
pub fn parse_payload(
    webhook_type: WebhookType,
    request: &WebhookRequest,
) -> Result<Option<Value>, String> {
    match webhook_type {
        WebhookType::Generic | WebhookType::Discord | WebhookType::Stripe => Ok(None),
        WebhookType::Telegram => parse_telegram(request).map(Some),
        WebhookType::Slack => parse_slack(request).map(Some),
        WebhookType::Github => parse_github(request).map(Some),
    }
}

fn parse_telegram(request: &WebhookRequest) -> Result<Value, String> {
    let body = request
        .body_json()
        .ok_or_else(|| "telegram payload is not JSON".to_string())?;
    let message = body.get("message").cloned().unwrap_or(Value::Null);

    Ok(json!({
        "update_id": body.get("update_id"),
        "chat_id": message.pointer("/chat/id"),
        "from_id": message.pointer("/from/id"),
        "from_username": message.pointer("/from/username"),
        "text": message.get("text"),
        "has_attachments": message.get("photo").is_some()
            || message.get("document").is_some()
            || message.get("voice").is_some(),
    }))
}

fn parse_slack(request: &WebhookRequest) -> Result<Value, String> {
    let body = request
        .body_json()
        .ok_or_else(|| "slack payload is not JSON".to_string())?;
    let event = body.get("event").cloned().unwrap_or(Value::Null);

    Ok(json!({
        "team_id": body.get("team_id"),
        "channel_id": event.get("channel").or_else(|| body.get("channel_id")),
        "user_id": event.get("user").or_else(|| body.get("user_id")),
        "text": event.get("text").or_else(|| body.get("text")),
        "ts": event.get("ts").or_else(|| body.get("ts")),
    }))
}

fn parse_github(request: &WebhookRequest) -> Result<Value, String> {
    let body = request
        .body_json()
        .ok_or_else(|| "github payload is not JSON".to_string())?;

    Ok(json!({
        "event": request.headers.get("x-github-event"),
        "delivery": request.headers.get("x-github-delivery"),
        "repository": body.pointer("/repository/full_name"),
        "sender": body.pointer("/sender/login"),
        "action": body.get("action"),
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn webhook_trigger(
        allowed_methods: Vec<&str>,
        webhook_type: WebhookType,
        validation_rules: Value,
    ) -> Trigger {
        Trigger {
            id: Uuid::new_v4(),
            name: "hook".to_string(),
            description: String::new(),
            agent_id: Uuid::new_v4(),
            workspace_id: "ws-1".to_string(),
            created_by: "user-1".to_string(),
            is_active: true,
            task_parameters: json!({}),
            conditions: json!({}),
            failure_threshold: 5,
            consecutive_failures: 0,
            last_execution_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            spec: TriggerSpec::Webhook {
                webhook_id: "hook-1".to_string(),
                allowed_methods: allowed_methods.into_iter().map(String::from).collect(),
                webhook_type,
                validation_rules,
                webhook_config: None,
            },
        }
    }

    fn request(method: &str, headers: &[(&str, &str)], body: &str) -> WebhookRequest {
        WebhookRequest {
            method: method.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_method_check_is_case_insensitive() {
        let trigger = webhook_trigger(vec!["POST"], WebhookType::Generic, json!({}));
        assert!(method_allowed(&trigger, "POST"));
        assert!(method_allowed(&trigger, "post"));
        assert!(!method_allowed(&trigger, "GET"));
    }

    #[test]
    fn test_required_headers_rule() {
        let trigger = webhook_trigger(
            vec!["POST"],
            WebhookType::Generic,
            json!({"required_headers": ["X-Signature"]}),
        );

        let ok = request("POST", &[("x-signature", "abc")], "{}");
        assert!(apply_validation_rules(&trigger, &ok).is_ok());

        let missing = request("POST", &[], "{}");
        assert!(apply_validation_rules(&trigger, &missing).is_err());
    }

    #[test]
    fn test_content_type_substring_rule() {
        let trigger = webhook_trigger(
            vec!["POST"],
            WebhookType::Generic,
            json!({"content_type": "application/json"}),
        );

        let ok = request(
            "POST",
            &[("content-type", "application/json; charset=utf-8")],
            "{}",
        );
        assert!(apply_validation_rules(&trigger, &ok).is_ok());

        let wrong = request("POST", &[("content-type", "text/plain")], "{}");
        assert!(apply_validation_rules(&trigger, &wrong).is_err());
    }

    #[test]
    fn test_body_format_rule() {
        let trigger = webhook_trigger(
            vec!["POST"],
            WebhookType::Generic,
            json!({"body_format": "json"}),
        );

        assert!(apply_validation_rules(&trigger, &request("POST", &[], r#"{"a": 1}"#)).is_ok());
        assert!(apply_validation_rules(&trigger, &request("POST", &[], "not json")).is_err());
    }

    #[test]
    fn test_generic_body_passthrough() {
        let trigger = webhook_trigger(vec!["POST"], WebhookType::Generic, json!({}));
        let req = request(
            "POST",
            &[],
            r#"{"ref": "refs/heads/main", "branch": "main"}"#,
        );

        let data = build_request_data(&trigger, &req);
        assert_eq!(data["body"]["branch"], "main");
        assert_eq!(data["method"], "POST");
        assert!(data.get("parse_error").is_none());
    }

    #[test]
    fn test_non_json_body_kept_as_string() {
        let trigger = webhook_trigger(vec!["POST"], WebhookType::Generic, json!({}));
        let req = request("POST", &[], "plain text payload");

        let data = build_request_data(&trigger, &req);
        assert_eq!(data["body"], "plain text payload");
    }

    #[test]
    fn test_telegram_extraction() {
        let trigger = webhook_trigger(vec!["POST"], WebhookType::Telegram, json!({}));
        let req = request(
            "POST",
            &[],
            r#"{
                "update_id": 12345,
                "message": {
                    "chat": {"id": 678},
                    "from": {"id": 42, "username": "ada"},
                    "text": "hello"
                }
            }"#,
        );

        let data = build_request_data(&trigger, &req);
        assert_eq!(data["parsed"]["update_id"], 12345);
        assert_eq!(data["parsed"]["chat_id"], 678);
        assert_eq!(data["parsed"]["from_username"], "ada");
        assert_eq!(data["parsed"]["text"], "hello");
        assert_eq!(data["parsed"]["has_attachments"], false);
    }

    #[test]
    fn test_slack_extraction() {
        let trigger = webhook_trigger(vec!["POST"], WebhookType::Slack, json!({}));
        let req = request(
            "POST",
            &[],
            r#"{
                "team_id": "T1",
                "event": {"channel": "C1", "user": "U1", "text": "hi", "ts": "123.456"}
            }"#,
        );

        let data = build_request_data(&trigger, &req);
        assert_eq!(data["parsed"]["team_id"], "T1");
        assert_eq!(data["parsed"]["channel_id"], "C1");
        assert_eq!(data["parsed"]["user_id"], "U1");
        assert_eq!(data["parsed"]["ts"], "123.456");
    }

    #[test]
    fn test_github_extraction_uses_headers() {
        let trigger = webhook_trigger(vec!["POST"], WebhookType::Github, json!({}));
        let req = request(
            "POST",
            &[
                ("x-github-event", "push"),
                ("x-github-delivery", "d-123"),
            ],
            r#"{
                "action": "opened",
                "repository": {"full_name": "acme/widgets"},
                "sender": {"login": "ada"}
            }"#,
        );

        let data = build_request_data(&trigger, &req);
        assert_eq!(data["parsed"]["event"], "push");
        assert_eq!(data["parsed"]["delivery"], "d-123");
        assert_eq!(data["parsed"]["repository"], "acme/widgets");
        assert_eq!(data["parsed"]["sender"], "ada");
        assert_eq!(data["parsed"]["action"], "opened");
    }

    #[test]
    fn test_parse_failure_is_non_fatal() {
        let trigger = webhook_trigger(vec!["POST"], WebhookType::Telegram, json!({}));
        let req = request("POST", &[], "not json at all");

        let data = build_request_data(&trigger, &req);
        // Raw body kept, parse_error attached
        assert_eq!(data["body"], "not json at all");
        assert!(data["parse_error"].is_string());
    }
}
