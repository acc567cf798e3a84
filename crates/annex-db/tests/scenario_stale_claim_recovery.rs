use std::time::Duration;

use uuid::Uuid;

mod util;

/// Crash recovery: a row whose lock is older than the lock-timeout window
/// becomes claimable again, with attempts incremented a second time.
#[tokio::test]
async fn expired_lock_is_reclaimable_with_attempts_bumped() -> anyhow::Result<()> {
    let Some(pool) = util::pool_or_skip().await? else {
        return Ok(());
    };

    let tag = format!("s3://t/stale-{}", Uuid::new_v4());
    let event_id = format!("annotation_created-stale-{}", Uuid::new_v4());
    annex_db::outbox_insert_or_ignore(&pool, &util::record(&event_id, "7", &tag)).await?;

    // First worker claims, then "crashes" (never finalizes).
    let first = annex_db::outbox_claim_batch(&pool, 1000, Duration::from_secs(300)).await?;
    let row = first
        .iter()
        .find(|r| r.payload["event_id"] == event_id.as_str())
        .expect("first claim must include the fresh row");
    assert_eq!(row.attempts, 1);
    let row_id = row.id;

    // Backdate the lock instead of sleeping out a real timeout.
    sqlx::query(
        "update stage.annotations_outbox set locked_at = now() - interval '10 minutes' where id = $1",
    )
    .bind(row_id)
    .execute(&pool)
    .await?;

    // Inside a 1-hour window the lock still holds.
    let held = annex_db::outbox_claim_batch(&pool, 1000, Duration::from_secs(3600)).await?;
    assert!(
        !held.iter().any(|r| r.id == row_id),
        "lock aged 10m must hold against a 1h timeout"
    );

    // Against a 5-minute window the lock has expired: recovery claim.
    let recovered = annex_db::outbox_claim_batch(&pool, 1000, Duration::from_secs(300)).await?;
    let row = recovered
        .iter()
        .find(|r| r.id == row_id)
        .expect("expired lock must be re-claimable");
    assert_eq!(row.attempts, 2, "recovery claim increments attempts again");

    annex_db::outbox_mark_processed(&pool, &[row_id], "test/cleanup.jsonl").await?;
    Ok(())
}

