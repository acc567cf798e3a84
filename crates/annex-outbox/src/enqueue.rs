//! Enqueue path.
//!
//! Orchestrates routing, validation, provenance extraction and event-ID
//! derivation for one webhook payload, then lands the serialized record in
//! the outbox with `ON CONFLICT DO NOTHING` semantics.

use annex_db::NewOutboxRecord;
use annex_routing::{action_eligible, derive_event_id, extract_source, route, validate, RouterConfig};
use annex_schemas::{AnnotationRecord, WebhookPayload, PRODUCER_SOURCE};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;

/// Enqueue knobs resolved from daemon configuration.
#[derive(Debug, Clone)]
pub struct EnqueueConfig {
    pub router: RouterConfig,
    /// Stamped into the record and later into the shard path.
    pub schema_version: String,
}

/// What happened to one webhook payload. The HTTP surface maps these to
/// metrics; none of them fail the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new outbox row was created.
    Inserted { event_id: String },
    /// The event key already existed; first insertion wins.
    Duplicate { event_id: String },
    /// Payload failed shape validation; nothing was written.
    Invalid { reason: &'static str },
    /// Action is not one we forward (e.g. deletes); counted, not written.
    NotEligible,
}

/// Route, validate and insert one webhook payload.
///
/// Serialization and database errors surface as `Err`; the webhook handler
/// absorbs them (metrics + log) so the upstream never sees a retryable
/// failure for a downstream problem.
pub async fn enqueue_webhook(
    pool: &PgPool,
    cfg: &EnqueueConfig,
    payload: &WebhookPayload,
) -> Result<EnqueueOutcome> {
    if !action_eligible(&payload.action) {
        debug!(action = %payload.action, "webhook action not eligible for enqueue");
        return Ok(EnqueueOutcome::NotEligible);
    }

    let routing = route(payload, &cfg.router);
    if let Err(reason) = validate(payload, routing.kind) {
        return Ok(EnqueueOutcome::Invalid { reason });
    }

    let project_id = payload.project_id().ok_or_else(|| anyhow!("missing project id"))?;
    let task_id = payload.task_id().unwrap_or_default();
    let event_id = derive_event_id(&payload.action, &payload.annotation, &project_id, &task_id);

    let source_ref = extract_source(payload.task_data());
    let source_tag = source_ref
        .as_ref()
        .map(|r| r.canonical_tag())
        .unwrap_or_default();

    let record = AnnotationRecord {
        event_id: event_id.clone(),
        action: payload.action.to_lowercase(),
        project_id: project_id.clone(),
        project_title: payload.project_title(),
        task_id,
        task_data: payload.task_data().clone(),
        annotation: payload.annotation.clone(),
        completed_by: payload.completed_by(),
        schema_version: cfg.schema_version.clone(),
        source: PRODUCER_SOURCE.to_string(),
        received_at: Utc::now(),
        source_ref,
    };

    let serialized = serde_json::to_value(&record).context("serialize annotation record")?;

    let created = annex_db::outbox_insert_or_ignore(
        pool,
        &NewOutboxRecord {
            event_id: event_id.clone(),
            project_id,
            payload: serialized,
            schema_version: cfg.schema_version.clone(),
            target_repo: routing.repo,
            task_type: routing.kind.as_str().to_string(),
            vertical: routing.vertical,
            source_tag,
        },
    )
    .await?;

    if created {
        Ok(EnqueueOutcome::Inserted { event_id })
    } else {
        debug!(event_id = %event_id, "duplicate webhook event dropped on unique constraint");
        Ok(EnqueueOutcome::Duplicate { event_id })
    }
}
