//! Structural validation of canonical message documents.
//!
//! Validation runs on the serialized document, which is exactly what the
//! archive stores: required fields present, enumerations respected, and
//! unknown fields rejected at every object level. Rejecting instead of
//! silently dropping unknown fields catches mapper drift early: a new
//! field added to the mapper without a matching schema change fails loud
//! here rather than landing half-indexed in the archive.
//!
//! A failed record is skipped (logged, counted) and the conversation's
//! cursor still advances past it; it is never written and does not count
//! toward `imported_count`.

use chrono::DateTime;
use serde_json::Value as JsonValue;

use crate::models::CanonicalMessage;

/// Outcome of validating one canonical message.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

const TOP_LEVEL_REQUIRED: &[&str] = &[
    "tenantId",
    "messageId",
    "chatId",
    "direction",
    "createdAt",
    "sender",
    "recipients",
    "content",
    "raw",
    "derived",
];
const TOP_LEVEL_OPTIONAL: &[&str] = &["context"];

const PARTICIPANT_REQUIRED: &[&str] = &["channelId", "role"];
const PARTICIPANT_OPTIONAL: &[&str] = &["displayName"];

const CONTENT_REQUIRED: &[&str] = &["kind", "text"];

/// Validate a canonical message against the archive document schema.
pub fn validate(message: &CanonicalMessage) -> ValidationReport {
    match serde_json::to_value(message) {
        Ok(doc) => validate_document(&doc),
        Err(e) => ValidationReport::failed(vec![format!("document not serializable: {}", e)]),
    }
}

/// Validate an already-serialized canonical document.
pub fn validate_document(doc: &JsonValue) -> ValidationReport {
    let mut errors = Vec::new();

    let Some(obj) = doc.as_object() else {
        return ValidationReport::failed(vec!["document is not an object".to_string()]);
    };

    check_keys(obj, TOP_LEVEL_REQUIRED, TOP_LEVEL_OPTIONAL, "", &mut errors);

    for field in ["tenantId", "messageId", "chatId"] {
        check_nonempty_string(obj.get(field), field, &mut errors);
    }

    match obj.get("direction").and_then(JsonValue::as_str) {
        Some("inbound") | Some("outbound") => {}
        Some(other) => errors.push(format!("direction has unknown value '{}'", other)),
        None => {} // missing already reported by check_keys
    }

    if let Some(created_at) = obj.get("createdAt") {
        match created_at.as_str() {
            Some(s) if DateTime::parse_from_rfc3339(s).is_ok() => {}
            Some(s) => errors.push(format!("createdAt is not an ISO-8601 timestamp: '{}'", s)),
            None => errors.push("createdAt must be a string".to_string()),
        }
    }

    if let Some(sender) = obj.get("sender") {
        validate_participant(sender, "sender", &mut errors);
    }

    match obj.get("recipients") {
        Some(JsonValue::Array(recipients)) => {
            for (i, recipient) in recipients.iter().enumerate() {
                validate_participant(recipient, &format!("recipients[{}]", i), &mut errors);
            }
        }
        Some(_) => errors.push("recipients must be an array".to_string()),
        None => {}
    }

    if let Some(content) = obj.get("content") {
        validate_content(content, &mut errors);
    }

    if let Some(derived) = obj.get("derived") {
        if !derived.is_array() {
            errors.push("derived must be an array".to_string());
        }
    }

    if errors.is_empty() {
        ValidationReport::ok()
    } else {
        ValidationReport::failed(errors)
    }
}

fn validate_participant(value: &JsonValue, path: &str, errors: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        errors.push(format!("{} must be an object", path));
        return;
    };
    check_keys(obj, PARTICIPANT_REQUIRED, PARTICIPANT_OPTIONAL, path, errors);
    check_nonempty_string(obj.get("channelId"), &format!("{}.channelId", path), errors);
    match obj.get("role").and_then(JsonValue::as_str) {
        Some("contact") | Some("agent") => {}
        Some(other) => errors.push(format!("{}.role has unknown value '{}'", path, other)),
        None => {}
    }
    if let Some(name) = obj.get("displayName") {
        if !name.is_string() {
            errors.push(format!("{}.displayName must be a string", path));
        }
    }
}

fn validate_content(value: &JsonValue, errors: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        errors.push("content must be an object".to_string());
        return;
    };
    check_keys(obj, CONTENT_REQUIRED, &[], "content", errors);
    check_nonempty_string(obj.get("kind"), "content.kind", errors);
    if let Some(text) = obj.get("text") {
        if !text.is_string() {
            errors.push("content.text must be a string".to_string());
        }
    }
}

/// Required keys must be present; anything outside required ∪ optional is
/// an unknown field and rejected.
fn check_keys(
    obj: &serde_json::Map<String, JsonValue>,
    required: &[&str],
    optional: &[&str],
    path: &str,
    errors: &mut Vec<String>,
) {
    let at = |field: &str| {
        if path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", path, field)
        }
    };
    for field in required {
        if !obj.contains_key(*field) {
            errors.push(format!("missing required field {}", at(field)));
        }
    }
    for key in obj.keys() {
        if !required.contains(&key.as_str()) && !optional.contains(&key.as_str()) {
            errors.push(format!("unknown field {}", at(key)));
        }
    }
}

fn check_nonempty_string(value: Option<&JsonValue>, path: &str, errors: &mut Vec<String>) {
    match value {
        Some(JsonValue::String(s)) if !s.is_empty() => {}
        Some(JsonValue::String(_)) => errors.push(format!("{} must not be empty", path)),
        Some(_) => errors.push(format!("{} must be a string", path)),
        None => {} // missing already reported by check_keys
    }
}
