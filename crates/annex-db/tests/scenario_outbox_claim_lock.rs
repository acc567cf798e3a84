use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

mod util;

/// A claimed row is locked for the lock-timeout window: a second claim in
/// that window must not see it.
#[tokio::test]
async fn claimed_rows_are_excluded_from_concurrent_claims() -> anyhow::Result<()> {
    let Some(pool) = util::pool_or_skip().await? else {
        return Ok(());
    };

    let tag = format!("s3://t/claim-{}", Uuid::new_v4());
    let mut our_ids: HashSet<String> = HashSet::new();
    for i in 0..3 {
        let event_id = format!("annotation_created-claim-{}-{i}", Uuid::new_v4());
        annex_db::outbox_insert_or_ignore(&pool, &util::record(&event_id, "7", &tag)).await?;
        our_ids.insert(event_id);
    }

    let lock_timeout = Duration::from_secs(300);

    // First claim picks our rows up (possibly alongside unrelated backlog).
    let first = annex_db::outbox_claim_batch(&pool, 1000, lock_timeout).await?;
    let first_events: HashSet<String> = first
        .iter()
        .filter_map(|r| r.payload.get("event_id").and_then(|v| v.as_str()))
        .map(str::to_string)
        .collect();
    for ev in &our_ids {
        assert!(first_events.contains(ev), "first claim must include {ev}");
    }
    for row in first.iter().filter(|r| {
        r.payload
            .get("event_id")
            .and_then(|v| v.as_str())
            .map_or(false, |e| our_ids.contains(e))
    }) {
        assert_eq!(row.attempts, 1, "first claim stamps attempts = 1");
    }

    // Second claim inside the lock window must skip them.
    let second = annex_db::outbox_claim_batch(&pool, 1000, lock_timeout).await?;
    let second_events: HashSet<String> = second
        .iter()
        .filter_map(|r| r.payload.get("event_id").and_then(|v| v.as_str()))
        .map(str::to_string)
        .collect();
    for ev in &our_ids {
        assert!(
            !second_events.contains(ev),
            "locked row {ev} must not be re-claimed inside the lock window"
        );
    }

    // Cleanup: finalize so later tests see no stray backlog from this one.
    let ids: Vec<i64> = first
        .iter()
        .filter(|r| {
            r.payload
                .get("event_id")
                .and_then(|v| v.as_str())
                .map_or(false, |e| our_ids.contains(e))
        })
        .map(|r| r.id)
        .collect();
    annex_db::outbox_mark_processed(&pool, &ids, "test/cleanup.jsonl").await?;

    Ok(())
}

/// Batch size zero returns immediately with an empty batch.
#[tokio::test]
async fn zero_limit_claims_nothing() -> anyhow::Result<()> {
    let Some(pool) = util::pool_or_skip().await? else {
        return Ok(());
    };
    let claimed = annex_db::outbox_claim_batch(&pool, 0, Duration::from_secs(300)).await?;
    assert!(claimed.is_empty());
    Ok(())
}
