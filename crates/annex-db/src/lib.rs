//! annex-db
//!
//! Postgres access for the annotation outbox. The outbox table is the sole
//! shared mutable resource between the webhook enqueuers and the flush
//! processor; every mutation here is scoped by `event_id` uniqueness or an
//! explicit id list, so N processor instances stay correct.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub const ENV_DB_URL: &str = "ANNEX_DATABASE_URL";

/// Most recent rows returned by an audit lookup. Operational default, not
/// a contract.
pub const AUDIT_ROW_LIMIT: i64 = 200;

/// `last_error` is truncated to this many characters before storage.
pub const LAST_ERROR_CAP: usize = 512;

// ---------------------------------------------------------------------------
// Pool bootstrap
// ---------------------------------------------------------------------------

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Connect using ANNEX_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity probe used by the health endpoint.
pub async fn ping(pool: &PgPool) -> Result<()> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("ping query failed")?;
    anyhow::ensure!(one == 1, "ping returned unexpected value");
    Ok(())
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Fields of a new outbox row. `payload` is the serialized annotation
/// record; the remaining columns are routing metadata for batching and
/// audit lookups.
#[derive(Debug, Clone)]
pub struct NewOutboxRecord {
    pub event_id: String,
    pub project_id: String,
    pub payload: Value,
    pub schema_version: String,
    pub target_repo: String,
    pub task_type: String,
    pub vertical: String,
    pub source_tag: String,
}

/// A row claimed for dispatch: the subset of columns the processor needs.
#[derive(Debug, Clone)]
pub struct ClaimedRow {
    pub id: i64,
    pub project_id: String,
    pub target_repo: String,
    pub vertical: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub attempts: i32,
}

/// Insert an annotation event with dedupe on `event_id`.
///
/// Idempotent behavior:
/// - If `event_id` already exists, returns Ok(false) and does NOT create a
///   second row.
/// - If inserted, returns Ok(true).
///
/// Replays of the same annotation event collide here and are silently
/// dropped; this is the pipeline's sole deduplication mechanism.
pub async fn outbox_insert_or_ignore(pool: &PgPool, rec: &NewOutboxRecord) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into stage.annotations_outbox
            (event_id, project_id, payload, schema_version, target_repo,
             task_type, vertical, source_tag)
        values ($1, $2, $3, $4, $5, $6, $7, $8)
        on conflict (event_id) do nothing
        returning id
        "#,
    )
    .bind(&rec.event_id)
    .bind(&rec.project_id)
    .bind(&rec.payload)
    .bind(&rec.schema_version)
    .bind(&rec.target_repo)
    .bind(&rec.task_type)
    .bind(&rec.vertical)
    .bind(&rec.source_tag)
    .fetch_optional(pool)
    .await
    .context("outbox_insert_or_ignore failed")?;

    Ok(row.is_some())
}

/// Atomically claim up to `limit` unprocessed rows for exclusive dispatch.
///
/// Uses `FOR UPDATE SKIP LOCKED` so concurrent claimers get disjoint
/// batches without blocking. A row whose `locked_at` is older than
/// `lock_timeout` is considered abandoned (crashed worker) and becomes
/// claimable again; that re-claim is the sole crash-recovery mechanism.
///
/// Claimed rows get `locked_at = now()` and `attempts + 1`. The caller
/// MUST finalize each row with `outbox_mark_processed` or
/// `outbox_mark_failed`; a claim that is never finalized expires after
/// `lock_timeout`.
///
/// Returned rows are sorted by `(created_at, id)` ascending so JSONL
/// assembly preserves creation order within the batch.
pub async fn outbox_claim_batch(
    pool: &PgPool,
    limit: i64,
    lock_timeout: Duration,
) -> Result<Vec<ClaimedRow>> {
    if limit <= 0 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        with to_claim as (
            select id
              from stage.annotations_outbox
             where processed_at is null
               and (locked_at is null or locked_at < now() - make_interval(secs => $2))
             order by created_at asc
             limit $1
               for update skip locked
        )
        update stage.annotations_outbox o
           set locked_at = now(),
               attempts  = attempts + 1
         where o.id in (select id from to_claim)
        returning o.id, o.project_id, o.target_repo, o.vertical,
                  o.payload, o.created_at, o.attempts
        "#,
    )
    .bind(limit)
    .bind(lock_timeout.as_secs_f64())
    .fetch_all(pool)
    .await
    .context("outbox_claim_batch failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(ClaimedRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            target_repo: row.try_get("target_repo")?,
            vertical: row.try_get("vertical")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            attempts: row.try_get("attempts")?,
        });
    }
    out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    Ok(out)
}

/// Finalize rows after a successful commit: stamp `processed_at` and the
/// committed shard path, release the lock, clear any stale error.
///
/// Idempotent, and never touches rows that are already terminal.
pub async fn outbox_mark_processed(pool: &PgPool, ids: &[i64], shard_path: &str) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        update stage.annotations_outbox
           set processed_at = now(),
               shard_path   = $2,
               locked_at    = null,
               last_error   = null
         where id = any($1)
           and processed_at is null
        "#,
    )
    .bind(ids)
    .bind(shard_path)
    .execute(pool)
    .await
    .context("outbox_mark_processed failed")?;
    Ok(())
}

/// Record a failed commit attempt and release the lock so the rows become
/// re-eligible on the next claim. `processed_at` stays null.
pub async fn outbox_mark_failed(pool: &PgPool, ids: &[i64], error_message: &str) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let truncated: String = error_message.chars().take(LAST_ERROR_CAP).collect();
    sqlx::query(
        r#"
        update stage.annotations_outbox
           set last_error = $2,
               locked_at  = null
         where id = any($1)
           and processed_at is null
        "#,
    )
    .bind(ids)
    .bind(truncated)
    .execute(pool)
    .await
    .context("outbox_mark_failed failed")?;
    Ok(())
}

/// Unprocessed row count (operator backlog gauge).
pub async fn outbox_backlog(pool: &PgPool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select count(*)::bigint
          from stage.annotations_outbox
         where processed_at is null
        "#,
    )
    .fetch_one(pool)
    .await
    .context("outbox_backlog failed")?;
    Ok(n)
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// One outbox row as surfaced by the audit endpoint.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub id: i64,
    pub event_id: String,
    pub project_id: String,
    pub schema_version: String,
    pub target_repo: String,
    pub task_type: String,
    pub vertical: String,
    pub source_tag: String,
    pub shard_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub payload: Value,
}

/// Most recent outbox rows for one canonical source tag, newest first,
/// capped at [`AUDIT_ROW_LIMIT`].
pub async fn audit_by_source_tag(pool: &PgPool, tag: &str) -> Result<Vec<AuditRow>> {
    let rows = sqlx::query(
        r#"
        select id, event_id, project_id, schema_version, target_repo,
               task_type, vertical, source_tag, shard_path,
               created_at, processed_at, payload
          from stage.annotations_outbox
         where source_tag = $1
         order by created_at desc
         limit $2
        "#,
    )
    .bind(tag)
    .bind(AUDIT_ROW_LIMIT)
    .fetch_all(pool)
    .await
    .context("audit_by_source_tag failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(AuditRow {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            project_id: row.try_get("project_id")?,
            schema_version: row.try_get("schema_version")?,
            target_repo: row.try_get("target_repo")?,
            task_type: row.try_get("task_type")?,
            vertical: row.try_get("vertical")?,
            source_tag: row.try_get("source_tag")?,
            shard_path: row.try_get("shard_path")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            payload: row.try_get("payload")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Staging (secondary ingest path)
// ---------------------------------------------------------------------------

/// One task row destined for the staging table.
#[derive(Debug, Clone)]
pub struct StagingTask {
    pub task_id: String,
    pub data: Value,
}

/// Upsert raw task rows; re-ingesting a task overwrites its data.
/// Returns the number of rows written.
pub async fn staging_upsert_tasks(
    pool: &PgPool,
    project_id: &str,
    tasks: &[StagingTask],
) -> Result<u64> {
    let mut written = 0u64;
    for t in tasks {
        sqlx::query(
            r#"
            insert into stage.tasks (project_id, task_id, data)
            values ($1, $2, $3)
            on conflict (project_id, task_id) do update
                set data        = excluded.data,
                    ingested_at = now()
            "#,
        )
        .bind(project_id)
        .bind(&t.task_id)
        .bind(&t.data)
        .execute(pool)
        .await
        .context("staging_upsert_tasks failed")?;
        written += 1;
    }
    Ok(written)
}

/// Append raw annotation rows. Returns the number of rows written.
pub async fn staging_insert_annotations(
    pool: &PgPool,
    project_id: &str,
    annotations: &[Value],
) -> Result<u64> {
    let mut written = 0u64;
    for ann in annotations {
        let task_id = ann
            .get("task")
            .and_then(|v| v.as_i64())
            .map(|n| n.to_string())
            .or_else(|| {
                ann.get("task")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        sqlx::query(
            r#"
            insert into stage.task_annotations (project_id, task_id, annotation)
            values ($1, $2, $3)
            "#,
        )
        .bind(project_id)
        .bind(task_id)
        .bind(ann)
        .execute(pool)
        .await
        .context("staging_insert_annotations failed")?;
        written += 1;
    }
    Ok(written)
}
