use std::time::Duration;

use uuid::Uuid;

mod util;

/// Marking failed releases the lock immediately (no timeout wait) and
/// records a truncated error.
#[tokio::test]
async fn mark_failed_releases_lock_and_truncates_error() -> anyhow::Result<()> {
    let Some(pool) = util::pool_or_skip().await? else {
        return Ok(());
    };

    let tag = format!("s3://t/failed-{}", Uuid::new_v4());
    let event_id = format!("annotation_created-failed-{}", Uuid::new_v4());
    annex_db::outbox_insert_or_ignore(&pool, &util::record(&event_id, "7", &tag)).await?;

    let claimed = annex_db::outbox_claim_batch(&pool, 1000, Duration::from_secs(300)).await?;
    let row_id = claimed
        .iter()
        .find(|r| r.payload["event_id"] == event_id.as_str())
        .expect("claim must include the fresh row")
        .id;

    let long_error = "e".repeat(2000);
    annex_db::outbox_mark_failed(&pool, &[row_id], &long_error).await?;

    let rows = annex_db::audit_by_source_tag(&pool, &tag).await?;
    let row = rows.iter().find(|r| r.id == row_id).unwrap();
    assert!(row.processed_at.is_none(), "failure must not be terminal");
    assert!(row.shard_path.is_none());

    let (last_error,): (Option<String>,) =
        sqlx::query_as("select last_error from stage.annotations_outbox where id = $1")
            .bind(row_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(
        last_error.unwrap().len(),
        annex_db::LAST_ERROR_CAP,
        "stored error must be truncated"
    );

    // Re-eligible immediately even with a long lock timeout.
    let reclaimed = annex_db::outbox_claim_batch(&pool, 1000, Duration::from_secs(3600)).await?;
    let row = reclaimed
        .iter()
        .find(|r| r.id == row_id)
        .expect("failed row must be immediately re-claimable");
    assert_eq!(row.attempts, 2);

    annex_db::outbox_mark_processed(&pool, &[row_id], "test/cleanup.jsonl").await?;
    Ok(())
}
