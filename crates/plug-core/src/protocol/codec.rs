//! JSON codec for the dispatcher envelope.
//!
//! Two kinds of readers live here:
//!
//! - **Tolerant readers** ([`decode_action`], [`decode_request_id`]) never
//!   fail.  Numbers and booleans are read as their JSON text.  A missing
//!   field, an object, array or `null` value, or a frame that is not a JSON
//!   object all yield an empty string.  The request id in particular must be
//!   recoverable even from a broken frame so the error reply can still be
//!   correlated.
//!
//! - **Strict decoders** ([`decode_launch_plan`], [`decode_get_status`])
//!   return [`CodecError::MalformedPayload`] when a required field is missing
//!   or has the wrong type.
//!
//! All encoders build flat objects with `serde_json::json!`, so they cannot
//! fail.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::protocol::messages::{
    GetStatusRequest, LaunchPlanRequest, ACTION_GET_STATUS, ACTION_LAUNCH_PLAN, ACTION_LOGIN,
    ACTION_REGISTER,
};

/// Errors produced by the strict decoders.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The frame is not valid JSON, or a required field is missing or mistyped.
    #[error("malformed {action} payload: {reason}")]
    MalformedPayload {
        action: &'static str,
        reason: String,
    },
}

// ── Tolerant readers ──────────────────────────────────────────────────────────

/// Extracts the `action` tag, lower-cased.
///
/// Returns an empty string when the tag cannot be read; callers treat that as
/// an unsupported action.
///
/// # Examples
///
/// ```rust
/// use plug_core::decode_action;
///
/// assert_eq!(decode_action(r#"{"action":"LaunchPlan"}"#), "launchplan");
/// assert_eq!(decode_action("not json"), "");
/// ```
pub fn decode_action(raw: &str) -> String {
    read_string_field(raw, "action")
        .unwrap_or_default()
        .to_lowercase()
}

/// Extracts the `requestId` correlation token, or an empty string.
pub fn decode_request_id(raw: &str) -> String {
    read_string_field(raw, "requestId").unwrap_or_default()
}

fn read_string_field(raw: &str, name: &str) -> Option<String> {
    let object: Map<String, Value> = serde_json::from_str(raw).ok()?;
    match object.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// ── Strict decoders ───────────────────────────────────────────────────────────

/// Decodes a `launchplan` request.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayload`] if `planName` or `objectSpec` is
/// missing, or any field has the wrong JSON type.
pub fn decode_launch_plan(raw: &str) -> Result<LaunchPlanRequest, CodecError> {
    decode_strict(raw, ACTION_LAUNCH_PLAN)
}

/// Decodes a `getstatus` request.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayload`] if `planName` or `executionId` is
/// missing or not a string.
pub fn decode_get_status(raw: &str) -> Result<GetStatusRequest, CodecError> {
    decode_strict(raw, ACTION_GET_STATUS)
}

fn decode_strict<T: DeserializeOwned>(raw: &str, action: &'static str) -> Result<T, CodecError> {
    serde_json::from_str(raw).map_err(|e| {
        debug!("rejecting {action} payload: {e}");
        CodecError::MalformedPayload {
            action,
            reason: e.to_string(),
        }
    })
}

// ── Encoders ──────────────────────────────────────────────────────────────────

/// Builds the credential message sent first on every new connection.
pub fn encode_login(api_key: &str) -> String {
    json!({ "action": ACTION_LOGIN, "key": api_key }).to_string()
}

/// Builds the registration message announcing this plug's `name` and `kind`.
pub fn encode_register(name: &str, kind: &str) -> String {
    json!({ "action": ACTION_REGISTER, "type": kind, "name": name }).to_string()
}

/// Builds the reply to a `launchplan` request.
pub fn encode_launch_plan_response(request_id: &str, build_id: &str) -> String {
    json!({ "requestId": request_id, "value": build_id }).to_string()
}

/// Builds the reply to a `getstatus` request.
pub fn encode_status_response(
    request_id: &str,
    is_finished: bool,
    succeeded: bool,
    explanation: &str,
) -> String {
    json!({
        "requestId": request_id,
        "isFinished": is_finished,
        "succeeded": succeeded,
        "explanation": explanation,
    })
    .to_string()
}

/// Builds the reply sent when a request could not be handled.
pub fn encode_error_response(request_id: &str, message: &str) -> String {
    json!({ "requestId": request_id, "error": message }).to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    // ── decode_action ─────────────────────────────────────────────────────────

    #[test]
    fn test_decode_action_is_case_insensitive() {
        assert_eq!(decode_action(r#"{"action":"GetStatus"}"#), "getstatus");
        assert_eq!(decode_action(r#"{"action":"LAUNCHPLAN"}"#), "launchplan");
    }

    #[test]
    fn test_decode_action_missing_field_returns_empty() {
        assert_eq!(decode_action(r#"{"requestId":"1"}"#), "");
    }

    #[test]
    fn test_decode_action_scalar_is_read_as_text() {
        assert_eq!(decode_action(r#"{"action":42}"#), "42");
        assert_eq!(decode_action(r#"{"action":true}"#), "true");
    }

    #[test]
    fn test_decode_action_structured_value_returns_empty() {
        assert_eq!(decode_action(r#"{"action":{"name":"getstatus"}}"#), "");
        assert_eq!(decode_action(r#"{"action":null}"#), "");
    }

    #[test]
    fn test_decode_action_invalid_json_returns_empty() {
        assert_eq!(decode_action("{not json"), "");
        assert_eq!(decode_action("[1,2,3]"), "");
    }

    // ── decode_request_id ─────────────────────────────────────────────────────

    #[test]
    fn test_decode_request_id_reads_token_unchanged() {
        let raw = r#"{"action":"getstatus","requestId":"Req-7F/a"}"#;
        assert_eq!(decode_request_id(raw), "Req-7F/a");
    }

    #[test]
    fn test_decode_request_id_numeric_token_is_echoed_as_text() {
        let raw = r#"{"action":"getstatus","requestId":17,"planName":"p"}"#;
        assert_eq!(decode_request_id(raw), "17");
        assert_eq!(decode_request_id(r#"{"requestId":-2.5}"#), "-2.5");
        assert_eq!(decode_request_id(r#"{"requestId":false}"#), "false");
    }

    #[test]
    fn test_decode_request_id_structured_value_returns_empty() {
        assert_eq!(decode_request_id(r#"{"requestId":[1]}"#), "");
        assert_eq!(decode_request_id(r#"{"requestId":{"id":"1"}}"#), "");
        assert_eq!(decode_request_id(r#"{"requestId":null}"#), "");
    }

    #[test]
    fn test_decode_request_id_malformed_returns_empty() {
        assert_eq!(decode_request_id("garbage"), "");
        assert_eq!(decode_request_id(r#"{"action":"getstatus"}"#), "");
    }

    // ── strict decoders ───────────────────────────────────────────────────────

    #[test]
    fn test_decode_launch_plan_reads_all_fields() {
        // Arrange
        let raw = r#"{
            "action": "launchplan",
            "requestId": "9",
            "planName": "Proj_Build",
            "objectSpec": "br:/main/scm003@repo@localhost:8087",
            "comment": "nightly",
            "properties": {"branch": "main", "env": "ci"}
        }"#;

        // Act
        let request = decode_launch_plan(raw).unwrap();

        // Assert
        assert_eq!(request.plan_name, "Proj_Build");
        assert_eq!(request.object_spec, "br:/main/scm003@repo@localhost:8087");
        assert_eq!(request.comment, "nightly");
        assert_eq!(request.properties.len(), 2);
        assert_eq!(request.properties["branch"], "main");
    }

    #[test]
    fn test_decode_launch_plan_missing_plan_name_is_malformed() {
        let raw = r#"{"action":"launchplan","objectSpec":"x"}"#;
        let err = decode_launch_plan(raw).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedPayload { action: "launchplan", .. }
        ));
        assert!(err.to_string().contains("planName"));
    }

    #[test]
    fn test_decode_launch_plan_mistyped_properties_is_malformed() {
        let raw = r#"{"planName":"p","objectSpec":"s","properties":["a"]}"#;
        assert!(decode_launch_plan(raw).is_err());
    }

    #[test]
    fn test_decode_get_status_reads_fields() {
        let raw = r#"{"action":"getstatus","requestId":"3","planName":"p","executionId":"1045"}"#;
        let request = decode_get_status(raw).unwrap();
        assert_eq!(request.plan_name, "p");
        assert_eq!(request.execution_id, "1045");
    }

    #[test]
    fn test_decode_get_status_missing_execution_id_is_malformed() {
        let err = decode_get_status(r#"{"planName":"p"}"#).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedPayload { action: "getstatus", .. }
        ));
    }

    // ── encoders ──────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_login_is_flat_object() {
        let value = parse(&encode_login("0123ABCD"));
        assert_eq!(value, json!({"action": "login", "key": "0123ABCD"}));
    }

    #[test]
    fn test_encode_register_carries_type_and_name() {
        let value = parse(&encode_register("teamcity", "ciPlug"));
        assert_eq!(
            value,
            json!({"action": "register", "type": "ciPlug", "name": "teamcity"})
        );
    }

    #[test]
    fn test_launch_plan_response_request_id_and_value_survive_decoding() {
        // Arrange
        let raw = encode_launch_plan_response("req-\"quoted\"", "1045");

        // Act
        let request_id = decode_request_id(&raw);
        let value = read_string_field(&raw, "value");

        // Assert
        assert_eq!(request_id, "req-\"quoted\"");
        assert_eq!(value.as_deref(), Some("1045"));
    }

    #[test]
    fn test_encode_status_response_fields() {
        let value = parse(&encode_status_response("5", true, false, "unknown id"));
        assert_eq!(value["requestId"], "5");
        assert_eq!(value["isFinished"], true);
        assert_eq!(value["succeeded"], false);
        assert_eq!(value["explanation"], "unknown id");
    }

    #[test]
    fn test_encode_error_response_fields() {
        let value = parse(&encode_error_response("", "bad frame"));
        assert_eq!(value, json!({"requestId": "", "error": "bad frame"}));
    }
}
