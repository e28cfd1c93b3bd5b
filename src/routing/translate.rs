//! Payload translation for the secondary provider.
//!
//! # Responsibilities
//! - Rewrite the model identifier to the secondary provider's model
//! - Remove fields the secondary provider rejects
//! - Strip `cache_control` markers at every level they can appear
//!
//! # Design Decisions
//! - Operates on an owned copy; the primary always gets the original bytes
//! - Unknown fields are passed through untouched

use serde_json::{Map, Value};

use crate::routing::classifier::is_web_search_tool;

/// Top-level fields the secondary provider does not accept.
const UNSUPPORTED_FIELDS: [&str; 6] = [
    "metadata",
    "prompt_caching",
    "service_tier",
    "context_management",
    "output_config",
    "extended_thinking",
];

/// Translate a parsed request body for the secondary provider.
///
/// Returns the translated payload and the names of removed fields.
pub fn for_secondary(mut payload: Value, model: &str) -> (Value, Vec<&'static str>) {
    let mut removed = Vec::new();
    let Some(object) = payload.as_object_mut() else {
        return (payload, removed);
    };

    object.insert("model".to_string(), Value::String(model.to_string()));

    for field in UNSUPPORTED_FIELDS {
        if object.remove(field).is_some() {
            removed.push(field);
        }
    }

    if let Some(Value::Object(thinking)) = object.get_mut("thinking") {
        if thinking.remove("budget_tokens").is_some() {
            removed.push("thinking.budget_tokens");
        }
    }

    strip_web_search(object, &mut removed);

    let mut stripped = false;
    for key in ["system", "messages", "tools"] {
        if let Some(value) = object.get_mut(key) {
            stripped |= strip_cache_control(value);
        }
    }
    if stripped {
        removed.push("cache_control");
    }

    (payload, removed)
}

fn strip_web_search(object: &mut Map<String, Value>, removed: &mut Vec<&'static str>) {
    if let Some(Value::Array(tools)) = object.get_mut("tools") {
        let before = tools.len();
        tools.retain(|tool| !is_web_search_tool(tool));
        if tools.len() != before {
            removed.push("tools.web_search");
        }
        if tools.is_empty() {
            object.remove("tools");
            if object.remove("tool_choice").is_some() {
                removed.push("tool_choice");
            }
            return;
        }
    }

    let names_web_search = object
        .get("tool_choice")
        .and_then(|choice| choice.get("name"))
        .and_then(Value::as_str)
        .map(|name| name.starts_with("web_search"))
        .unwrap_or(false);
    if names_web_search {
        object.remove("tool_choice");
        removed.push("tool_choice");
    }
}

/// Recursively remove `cache_control` from objects in arrays and nested content.
fn strip_cache_control(value: &mut Value) -> bool {
    match value {
        Value::Object(object) => {
            let mut stripped = object.remove("cache_control").is_some();
            if let Some(content) = object.get_mut("content") {
                stripped |= strip_cache_control(content);
            }
            stripped
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |acc, item| strip_cache_control(item) | acc),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rewrites_model_and_drops_unsupported_fields() {
        let payload = json!({
            "model": "claude-haiku-4-5",
            "max_tokens": 512,
            "metadata": {"user_id": "u"},
            "service_tier": "auto",
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [{"role": "user", "content": "hi"}]
        });

        let (out, removed) = for_secondary(payload, "glm-5");
        assert_eq!(out["model"], "glm-5");
        assert_eq!(out["max_tokens"], 512);
        assert!(out.get("metadata").is_none());
        assert!(out.get("service_tier").is_none());
        assert_eq!(out["thinking"], json!({"type": "enabled"}));
        assert_eq!(removed, vec!["metadata", "service_tier", "thinking.budget_tokens"]);
    }

    #[test]
    fn test_strips_cache_control_everywhere() {
        let payload = json!({
            "model": "claude-sonnet-4-6",
            "system": [{"type": "text", "text": "sys", "cache_control": {"type": "ephemeral"}}],
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": "hi", "cache_control": {"type": "ephemeral"}}]
            }],
            "tools": [{"name": "Read", "input_schema": {}, "cache_control": {"type": "ephemeral"}}]
        });

        let (out, removed) = for_secondary(payload, "glm-5");
        let text = out.to_string();
        assert!(!text.contains("cache_control"));
        assert_eq!(out["tools"][0]["name"], "Read");
        assert_eq!(removed, vec!["cache_control"]);
    }

    #[test]
    fn test_web_search_only_tools_are_removed_with_choice() {
        let payload = json!({
            "model": "claude-haiku-4-5",
            "tools": [{"type": "web_search_20250305", "name": "web_search"}],
            "tool_choice": {"type": "auto"}
        });

        let (out, _) = for_secondary(payload, "glm-5");
        assert!(out.get("tools").is_none());
        assert!(out.get("tool_choice").is_none());
    }

    #[test]
    fn test_other_tools_survive() {
        let payload = json!({
            "model": "claude-haiku-4-5",
            "tools": [{"name": "Bash"}, {"type": "web_search_20250305", "name": "web_search"}],
            "tool_choice": {"type": "tool", "name": "web_search"}
        });

        let (out, removed) = for_secondary(payload, "glm-5");
        assert_eq!(out["tools"], json!([{"name": "Bash"}]));
        assert!(out.get("tool_choice").is_none());
        assert_eq!(removed, vec!["tools.web_search", "tool_choice"]);
    }

    #[test]
    fn test_non_object_passes_through() {
        let (out, removed) = for_secondary(json!([1, 2]), "glm-5");
        assert_eq!(out, json!([1, 2]));
        assert!(removed.is_empty());
    }
}
