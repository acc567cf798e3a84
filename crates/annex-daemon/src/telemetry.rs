//! Metrics recorder bootstrap.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return the render handle.
/// Call once at daemon startup.
pub fn install() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install prometheus recorder")?;

    describe_counter!(
        "annex_webhook_requests_total",
        "Webhook requests by outcome"
    );
    describe_counter!(
        "annex_enqueue_total",
        "Enqueue attempts by status"
    );
    describe_counter!(
        "annex_outbox_claimed_total",
        "Outbox rows claimed for dispatch"
    );
    describe_counter!(
        "annex_outbox_commits_total",
        "Remote commits by repo and status"
    );
    describe_counter!(
        "annex_outbox_records_total",
        "Outbox records flushed by status"
    );
    describe_gauge!(
        "annex_outbox_backlog",
        "Unprocessed outbox rows at last claim"
    );

    Ok(handle)
}

/// A render handle backed by a recorder that is NOT installed globally.
/// In-process router tests use this so multiple AppStates can coexist.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}
