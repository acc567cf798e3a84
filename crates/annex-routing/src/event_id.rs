//! Event-ID derivation.
//!
//! The derived string is the outbox idempotency key: replays of the same
//! annotation event must collide on it. Precedence: annotation id, then
//! annotation uuid, then `<project>-<task>`, then a random token as the
//! last resort (which defeats idempotency, hence the loud log line).

use annex_schemas::coerce_str;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Derive the idempotency key for one webhook event.
pub fn derive_event_id(
    action: &str,
    annotation: &Value,
    project_id: &str,
    task_id: &str,
) -> String {
    let action = action.to_lowercase();

    if let Some(id) = annotation.get("id").and_then(coerce_str) {
        return format!("{action}-{id}");
    }
    if let Some(uuid) = annotation.get("uuid").and_then(|v| v.as_str()) {
        if !uuid.is_empty() {
            return format!("{action}-{uuid}");
        }
    }
    if !task_id.is_empty() {
        return format!("{action}-{project_id}-{task_id}");
    }

    // No stable identity anywhere in the payload. A random key means a
    // replay of this event will NOT dedupe; make that visible.
    warn!(
        action = %action,
        project_id = %project_id,
        "no annotation id/uuid or task id; falling back to random event id"
    );
    format!("{action}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_annotation_id() {
        let ann = json!({"id": 42, "uuid": "u-1"});
        assert_eq!(
            derive_event_id("ANNOTATION_CREATED", &ann, "7", "1"),
            "annotation_created-42"
        );
    }

    #[test]
    fn falls_back_to_uuid_then_task() {
        let ann = json!({"uuid": "u-1"});
        assert_eq!(
            derive_event_id("annotation_updated", &ann, "7", "1"),
            "annotation_updated-u-1"
        );

        let ann = json!({});
        assert_eq!(
            derive_event_id("annotation_created", &ann, "7", "19"),
            "annotation_created-7-19"
        );
    }

    #[test]
    fn anonymous_events_get_random_uuid_suffix() {
        let ann = json!({});
        let a = derive_event_id("annotation_created", &ann, "7", "");
        let b = derive_event_id("annotation_created", &ann, "7", "");
        assert!(a.starts_with("annotation_created-"));
        assert_ne!(a, b, "random fallback must not collide");

        // RFC-4122 v4 shape: version nibble 4, variant in {8,9,a,b}.
        let suffix = a.strip_prefix("annotation_created-").unwrap();
        let parts: Vec<&str> = suffix.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert!(parts[2].starts_with('4'));
        assert!(matches!(
            parts[3].chars().next().unwrap(),
            '8' | '9' | 'a' | 'b'
        ));
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let ann = json!({"id": "abc"});
        let a = derive_event_id("ANNOTATION_CREATED", &ann, "7", "1");
        let b = derive_event_id("annotation_created", &ann, "7", "1");
        assert_eq!(a, b);
    }
}
