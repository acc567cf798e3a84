//! Outbox flush loop.
//!
//! Claims a batch under row locks, groups it by (repo, project), assembles
//! one JSONL shard per group and commits it remotely, then finalizes rows.
//! One group's failure never aborts the others; failed rows release their
//! lock and wait for the next claim.

use std::time::Duration;

use annex_commit::{build_shard_path, ClientCache, CommitOperation};
use annex_db::ClaimedRow;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Deadline for the claim transaction.
const CLAIM_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for finalization updates.
const MARK_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: i64,
    pub poll_interval: Duration,
    /// A claimed row whose lock is older than this becomes re-claimable;
    /// size it above the worst-case commit latency plus margin.
    pub lock_timeout: Duration,
    /// Warning threshold only; rows are retried forever.
    pub max_attempts: i32,
    pub schema_version: String,
    /// Destination for rows whose `target_repo` column is empty.
    pub default_repo: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(15),
            lock_timeout: Duration::from_secs(300),
            max_attempts: 12,
            schema_version: "v1".to_string(),
            default_repo: "annotations/raw".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// The single long-lived flush task. One instance per deployment is
/// assumed, but the claim protocol (skip-locked + lock expiry) keeps N
/// instances correct.
pub struct Processor {
    pool: PgPool,
    clients: ClientCache,
    cfg: ProcessorConfig,
}

impl Processor {
    pub fn new(pool: PgPool, clients: ClientCache, cfg: ProcessorConfig) -> Self {
        Self { pool, clients, cfg }
    }

    /// Tick loop. Re-loops immediately after a productive iteration so a
    /// backlog drains at claim speed rather than at poll speed; `shutdown`
    /// is honored between ticks and between groups.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        let mut shutdown = shutdown;
        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            batch_size = self.cfg.batch_size,
            poll_interval_secs = self.cfg.poll_interval.as_secs(),
            lock_timeout_secs = self.cfg.lock_timeout.as_secs(),
            "outbox processor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("outbox processor stopping");
                    return;
                }
            }

            loop {
                if *shutdown.borrow() {
                    info!("outbox processor stopping");
                    return;
                }
                match self.run_once(&shutdown).await {
                    Ok(0) => break,
                    Ok(n) => debug!(records = n, "productive iteration; re-looping"),
                    Err(err) => {
                        warn!(error = %err, "outbox iteration failed; waiting for next tick");
                        break;
                    }
                }
            }
        }
    }

    /// One claim-and-flush iteration. Returns the number of records
    /// claimed (a productive iteration triggers an immediate re-loop).
    pub async fn run_once(&mut self, shutdown: &watch::Receiver<bool>) -> Result<usize> {
        let claimed = timeout(
            CLAIM_TIMEOUT,
            annex_db::outbox_claim_batch(&self.pool, self.cfg.batch_size, self.cfg.lock_timeout),
        )
        .await
        .context("outbox claim timed out")??;

        if let Ok(backlog) = annex_db::outbox_backlog(&self.pool).await {
            gauge!("annex_outbox_backlog").set(backlog as f64);
        }

        if claimed.is_empty() {
            return Ok(0);
        }

        counter!("annex_outbox_claimed_total").increment(claimed.len() as u64);
        for row in &claimed {
            if row.attempts >= self.cfg.max_attempts {
                warn!(
                    outbox_id = row.id,
                    attempts = row.attempts,
                    project_id = %row.project_id,
                    "outbox row exceeded max attempts; retrying anyway"
                );
            }
        }

        let total = claimed.len();
        let groups = group_rows(claimed, &self.cfg.default_repo);

        for group in &groups {
            if *shutdown.borrow() {
                // Unflushed groups keep their locks and recover via the
                // lock-timeout window after restart.
                warn!(
                    pending_groups = groups.len(),
                    "shutdown mid-batch; remaining groups left to lock expiry"
                );
                break;
            }
            self.flush_group(group).await;
        }

        Ok(total)
    }

    /// Commit one (repo, project) group and finalize its rows. Failures
    /// are absorbed here: they mark the rows and move on.
    async fn flush_group(&mut self, group: &BatchGroup) {
        let shard_path = build_shard_path(
            &self.cfg.schema_version,
            &group.vertical,
            &group.project_id,
            group.first_created_at,
        );

        let body = match assemble_jsonl(&group.payloads) {
            Ok(b) => b,
            Err(err) => {
                error!(
                    repo = %group.repo,
                    project_id = %group.project_id,
                    error = %err,
                    "failed to assemble JSONL body"
                );
                self.mark_failed(group, &format!("jsonl assembly: {err:#}")).await;
                return;
            }
        };

        let op = CommitOperation {
            path: shard_path.clone(),
            content: BASE64.encode(&body),
        };
        let message = format!(
            "annex: {} annotation record(s) for project {}",
            group.ids.len(),
            group.project_id
        );

        let result = self
            .clients
            .client_for(&group.repo)
            .commit(&[op], &message)
            .await;

        match result {
            Ok(()) => {
                counter!("annex_outbox_commits_total", "repo" => group.repo.clone(), "status" => "ok")
                    .increment(1);
                counter!("annex_outbox_records_total", "status" => "ok")
                    .increment(group.ids.len() as u64);

                let marked = timeout(
                    MARK_TIMEOUT,
                    annex_db::outbox_mark_processed(&self.pool, &group.ids, &shard_path),
                )
                .await
                .context("mark_processed timed out")
                .and_then(|r| r);

                match marked {
                    Ok(()) => info!(
                        repo = %group.repo,
                        project_id = %group.project_id,
                        records = group.ids.len(),
                        shard = %shard_path,
                        "outbox group committed"
                    ),
                    Err(err) => {
                        // Commit landed but finalization did not: these rows
                        // re-deliver under a fresh batch filename once the
                        // lock expires. Downstream dedupes on event_id.
                        error!(
                            repo = %group.repo,
                            project_id = %group.project_id,
                            error = %err,
                            "commit succeeded but mark_processed failed; rows will re-deliver"
                        );
                    }
                }
            }
            Err(err) => {
                counter!("annex_outbox_commits_total", "repo" => group.repo.clone(), "status" => "error")
                    .increment(1);
                counter!("annex_outbox_records_total", "status" => "error")
                    .increment(group.ids.len() as u64);
                warn!(
                    repo = %group.repo,
                    project_id = %group.project_id,
                    records = group.ids.len(),
                    error = %err,
                    "outbox group commit failed"
                );
                self.mark_failed(group, &format!("{err:#}")).await;
            }
        }
    }

    async fn mark_failed(&self, group: &BatchGroup, reason: &str) {
        let res = timeout(
            MARK_TIMEOUT,
            annex_db::outbox_mark_failed(&self.pool, &group.ids, reason),
        )
        .await
        .context("mark_failed timed out")
        .and_then(|r| r);
        if let Err(err) = res {
            // Rows stay locked until the lock-timeout elapses.
            error!(
                project_id = %group.project_id,
                error = %err,
                "mark_failed did not complete; rows recover via lock expiry"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Grouping & JSONL assembly
// ---------------------------------------------------------------------------

/// One (repo, project) batch: the unit of a single remote commit.
#[derive(Debug, Clone)]
struct BatchGroup {
    repo: String,
    project_id: String,
    /// Vertical of the group's first row; drives the shard path.
    vertical: String,
    /// `created_at` of the group's first row; drives the time partition.
    first_created_at: DateTime<Utc>,
    ids: Vec<i64>,
    payloads: Vec<Value>,
}

/// Group claimed rows by (repo, project), preserving first-seen order and
/// the claim's creation-time order within each group. Empty `target_repo`
/// falls back to the configured default.
fn group_rows(rows: Vec<ClaimedRow>, default_repo: &str) -> Vec<BatchGroup> {
    let mut groups: Vec<BatchGroup> = Vec::new();

    for row in rows {
        let repo = if row.target_repo.is_empty() {
            default_repo.to_string()
        } else {
            row.target_repo.clone()
        };

        match groups
            .iter_mut()
            .find(|g| g.repo == repo && g.project_id == row.project_id)
        {
            Some(g) => {
                g.ids.push(row.id);
                g.payloads.push(row.payload);
            }
            None => groups.push(BatchGroup {
                repo,
                project_id: row.project_id,
                vertical: row.vertical,
                first_created_at: row.created_at,
                ids: vec![row.id],
                payloads: vec![row.payload],
            }),
        }
    }

    groups
}

/// One record per line, in claim order, each line terminated by `\n`.
fn assemble_jsonl(payloads: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for p in payloads {
        serde_json::to_writer(&mut out, p).context("serialize outbox payload line")?;
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(id: i64, project: &str, repo: &str, minute: u32) -> ClaimedRow {
        ClaimedRow {
            id,
            project_id: project.to_string(),
            target_repo: repo.to_string(),
            vertical: "maritime".to_string(),
            payload: json!({"event_id": format!("e{id}")}),
            created_at: Utc.with_ymd_and_hms(2024, 3, 7, 9, minute, 0).unwrap(),
            attempts: 1,
        }
    }

    #[test]
    fn groups_by_repo_then_project() {
        let rows = vec![
            row(1, "p1", "r1", 0),
            row(2, "p2", "r1", 1),
            row(3, "p1", "r1", 2),
            row(4, "p1", "r2", 3),
        ];
        let groups = group_rows(rows, "default");
        assert_eq!(groups.len(), 3);

        assert_eq!(groups[0].repo, "r1");
        assert_eq!(groups[0].project_id, "p1");
        assert_eq!(groups[0].ids, vec![1, 3]);

        assert_eq!(groups[1].repo, "r1");
        assert_eq!(groups[1].project_id, "p2");
        assert_eq!(groups[1].ids, vec![2]);

        assert_eq!(groups[2].repo, "r2");
        assert_eq!(groups[2].ids, vec![4]);
    }

    #[test]
    fn empty_repo_falls_back_to_default() {
        let groups = group_rows(vec![row(1, "p1", "", 0)], "annotations/raw");
        assert_eq!(groups[0].repo, "annotations/raw");
    }

    #[test]
    fn group_keeps_first_row_vertical_and_timestamp() {
        let mut a = row(1, "p1", "r1", 5);
        a.vertical = "maritime".to_string();
        let mut b = row(2, "p1", "r1", 9);
        b.vertical = "aerospace".to_string();

        let groups = group_rows(vec![a, b], "d");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].vertical, "maritime");
        assert_eq!(
            groups[0].first_created_at,
            Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap()
        );
    }

    #[test]
    fn jsonl_one_line_per_record_in_order() {
        let payloads = vec![json!({"event_id": "a"}), json!({"event_id": "b"})];
        let body = assemble_jsonl(&payloads).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text, "{\"event_id\":\"a\"}\n{\"event_id\":\"b\"}\n");
    }

    #[test]
    fn jsonl_of_empty_batch_is_empty() {
        assert!(assemble_jsonl(&[]).unwrap().is_empty());
    }
}
