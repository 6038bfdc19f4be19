//! Input Redaction
//!
//! Before an action's input is persisted to the action log, the JSON tree is
//! walked: values under sensitive keys are replaced outright, and when the
//! typed-text policy is on, every string beneath the free-text keys is
//! replaced too. Non-plain values pass through unchanged.

use serde_json::Value;
use std::collections::HashSet;

pub const REDACTED: &str = "[REDACTED]";

pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "auth",
    "cookie",
    "session",
    "credit_card",
    "card_number",
    "cvv",
    "ssn",
    "pin",
    "otp",
    "credential",
    "private_key",
];

/// Keys whose string content is user-typed text, redacted wholesale when
/// the typed-text policy is on.
const TYPED_TEXT_KEYS: &[&str] = &["text", "value", "fields", "script"];

#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    sensitive_keys: HashSet<String>,
    pub redact_typed_text: bool,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::new(&[], false)
    }
}

impl RedactionPolicy {
    pub fn new(extra_keys: &[String], redact_typed_text: bool) -> Self {
        let mut sensitive_keys: HashSet<String> = DEFAULT_SENSITIVE_KEYS
            .iter()
            .map(|k| k.to_ascii_lowercase())
            .collect();
        sensitive_keys.extend(extra_keys.iter().map(|k| k.to_ascii_lowercase()));
        Self {
            sensitive_keys,
            redact_typed_text,
        }
    }

    fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_keys.contains(&key.to_ascii_lowercase())
    }

    fn is_typed_text(&self, key: &str) -> bool {
        self.redact_typed_text && TYPED_TEXT_KEYS.contains(&key.to_ascii_lowercase().as_str())
    }
}

/// Sanitise an input value for persistence.
pub fn sanitize(value: &Value, policy: &RedactionPolicy) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                let replacement = if policy.is_sensitive(key) {
                    Value::String(REDACTED.to_string())
                } else if policy.is_typed_text(key) {
                    redact_strings(child)
                } else {
                    sanitize(child, policy)
                };
                out.insert(key.clone(), replacement);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| sanitize(v, policy)).collect()),
        other => other.clone(),
    }
}

/// Replace every string in the subtree, keeping structure and non-string
/// leaves intact.
fn redact_strings(value: &Value) -> Value {
    match value {
        Value::String(_) => Value::String(REDACTED.to_string()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_strings(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_strings).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_keys_are_case_insensitive_and_recursive() {
        let policy = RedactionPolicy::default();
        let input = json!({
            "user": "amy",
            "PassWord": "hunter2",
            "nested": { "api_KEY": "sk-123", "count": 3 }
        });
        let out = sanitize(&input, &policy);
        assert_eq!(out["user"], "amy");
        assert_eq!(out["PassWord"], REDACTED);
        assert_eq!(out["nested"]["api_KEY"], REDACTED);
        assert_eq!(out["nested"]["count"], 3);
    }

    #[test]
    fn typed_text_policy_covers_nested_children() {
        let policy = RedactionPolicy::new(&[], true);
        let input = json!({
            "fields": { "q": "query text", "limit": 10 },
            "text": "hello",
            "selector": "#q"
        });
        let out = sanitize(&input, &policy);
        assert_eq!(out["fields"]["q"], REDACTED);
        assert_eq!(out["fields"]["limit"], 10);
        assert_eq!(out["text"], REDACTED);
        assert_eq!(out["selector"], "#q");
    }

    #[test]
    fn extra_keys_merge_into_default_set() {
        let policy = RedactionPolicy::new(&["internal_ref".to_string()], false);
        let out = sanitize(&json!({ "Internal_Ref": "x9" }), &policy);
        assert_eq!(out["Internal_Ref"], REDACTED);
    }
}
