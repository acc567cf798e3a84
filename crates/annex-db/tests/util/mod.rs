//! Shared helpers for DB-backed scenario tests.

use annex_db::NewOutboxRecord;
use serde_json::json;
use sqlx::PgPool;

/// Connect + migrate, or skip the test when ANNEX_DATABASE_URL is unset.
pub async fn pool_or_skip() -> anyhow::Result<Option<PgPool>> {
    let url = match std::env::var(annex_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: {} not set", annex_db::ENV_DB_URL);
            return Ok(None);
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    annex_db::migrate(&pool).await?;
    Ok(Some(pool))
}

/// A minimal outbox record; `source_tag` doubles as the per-test readback
/// key, so give each test a unique one.
pub fn record(event_id: &str, project_id: &str, source_tag: &str) -> NewOutboxRecord {
    NewOutboxRecord {
        event_id: event_id.to_string(),
        project_id: project_id.to_string(),
        payload: json!({
            "event_id": event_id,
            "action": "annotation_created",
            "project_id": project_id,
        }),
        schema_version: "v1".to_string(),
        target_repo: "annotations/test".to_string(),
        task_type: "ner".to_string(),
        vertical: "maritime".to_string(),
        source_tag: source_tag.to_string(),
    }
}
