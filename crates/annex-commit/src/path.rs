//! Shard path layout.
//!
//! Committed files are partitioned by vertical, schema version, project and
//! UTC hour of the batch's first record:
//!
//! ```text
//! vertical=<V>/schema-<S>/project-<P>/<YYYY>/<MM>/<DD>/<HH>/batch-<uuid>.jsonl
//! ```

use chrono::{DateTime, Datelike, Timelike, Utc};
use uuid::Uuid;

/// Normalize one path component: `/` becomes `-`, spaces become `_`,
/// empty input becomes `unknown`.
pub fn safe_path_component(s: &str) -> String {
    if s.is_empty() {
        return "unknown".to_string();
    }
    s.replace('/', "-").replace(' ', "_")
}

/// Build the shard path for a batch. Pure aside from the trailing UUID.
pub fn build_shard_path(
    schema_version: &str,
    vertical: &str,
    project_id: &str,
    first_created_at: DateTime<Utc>,
) -> String {
    let t = first_created_at;
    format!(
        "vertical={}/schema-{}/project-{}/{:04}/{:02}/{:02}/{:02}/batch-{}.jsonl",
        safe_path_component(vertical),
        safe_path_component(schema_version),
        safe_path_component(project_id),
        t.year(),
        t.month(),
        t.day(),
        t.hour(),
        Uuid::new_v4()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalizer_rules() {
        assert_eq!(safe_path_component(""), "unknown");
        assert_eq!(safe_path_component("a/b c"), "a-b_c");
        assert_eq!(safe_path_component("maritime"), "maritime");
    }

    #[test]
    fn shard_path_shape() {
        let t = Utc.with_ymd_and_hms(2024, 3, 7, 9, 15, 0).unwrap();
        let p = build_shard_path("v1", "maritime", "7", t);

        let prefix = "vertical=maritime/schema-v1/project-7/2024/03/07/09/batch-";
        assert!(p.starts_with(prefix), "unexpected path: {p}");
        assert!(p.ends_with(".jsonl"));

        let uuid_part = &p[prefix.len()..p.len() - ".jsonl".len()];
        let parsed = Uuid::parse_str(uuid_part).expect("batch id must be a uuid");
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn shard_path_normalizes_components() {
        let t = Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap();
        let p = build_shard_path("2024 q4", "", "team/7", t);
        assert!(
            p.starts_with("vertical=unknown/schema-2024_q4/project-team-7/2024/12/31/23/"),
            "unexpected path: {p}"
        );
    }

    #[test]
    fn deterministic_aside_from_uuid() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        let a = build_shard_path("v1", "m", "p", t);
        let b = build_shard_path("v1", "m", "p", t);
        let stem = |s: &str| s.rsplit_once("batch-").map(|(x, _)| x.to_string());
        assert_eq!(stem(&a), stem(&b));
        assert_ne!(a, b);
    }
}
