//! Axum router and all HTTP handlers for annex-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and
//! attaches middleware layers. All handlers are `pub(crate)` so the
//! scenario tests in `tests/` can compose the router directly.
//!
//! Downstream failures are never surfaced to the webhook caller: a
//! parseable body always gets a 200 so the upstream does not retry-storm.
//! Everything else lands in metrics and logs.

use std::sync::Arc;
use std::time::Duration;

use annex_db::StagingTask;
use annex_outbox::{enqueue_webhook, EnqueueOutcome};
use annex_schemas::{coerce_str, WebhookPayload};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::{
    api_types::{
        AuditItem, AuditParams, AuditResponse, ErrorResponse, HealthResponse, IngestRequest,
        IngestResponse, WebhookResponse,
    },
    state::AppState,
};

/// Deadline for the health endpoint's DB ping.
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (tracing) are **not** applied here; `main.rs` attaches
/// them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/ingest", post(ingest))
        .route("/health", get(health))
        .route("/metrics", get(metrics_exposition))
        .route("/audit/source", get(audit_source))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// POST /webhook
// ---------------------------------------------------------------------------

pub(crate) async fn webhook(State(st): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(err) => {
            counter!("annex_webhook_requests_total", "outcome" => "malformed").increment(1);
            debug!(error = %err, "webhook body unparseable");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "invalid JSON body".to_string(),
                }),
            )
                .into_response();
        }
    };

    let action = payload.action.clone();

    let status = match &st.pool {
        Some(pool) => match enqueue_webhook(pool, &st.cfg.enqueue_config(), &payload).await {
            Ok(EnqueueOutcome::Inserted { event_id }) => {
                counter!("annex_enqueue_total", "status" => "ok").increment(1);
                debug!(event_id = %event_id, "webhook event enqueued");
                "enqueued"
            }
            Ok(EnqueueOutcome::Duplicate { event_id }) => {
                counter!("annex_enqueue_total", "status" => "duplicate").increment(1);
                debug!(event_id = %event_id, "duplicate webhook event");
                "duplicate"
            }
            Ok(EnqueueOutcome::Invalid { reason }) => {
                counter!("annex_enqueue_total", "status" => "invalid").increment(1);
                info!(action = %action, reason, "webhook payload failed validation");
                "invalid"
            }
            Ok(EnqueueOutcome::NotEligible) => {
                counter!("annex_enqueue_total", "status" => "skipped").increment(1);
                "ignored"
            }
            Err(err) => {
                // Absorbed: the upstream must not retry on our behalf.
                counter!("annex_enqueue_total", "status" => "error").increment(1);
                error!(action = %action, error = %err, "webhook enqueue failed");
                "error"
            }
        },
        None => {
            // No persistence: still classify + validate so operators see
            // payload quality in metrics, then drop.
            let routing = annex_routing::route(&payload, &st.cfg.router_config());
            match annex_routing::validate(&payload, routing.kind) {
                Ok(()) => counter!("annex_enqueue_total", "status" => "skipped").increment(1),
                Err(reason) => {
                    counter!("annex_enqueue_total", "status" => "invalid").increment(1);
                    info!(reason, "webhook payload failed validation (no persistence)");
                }
            }
            "skipped"
        }
    };

    counter!("annex_webhook_requests_total", "outcome" => status).increment(1);
    (StatusCode::OK, Json(WebhookResponse { status, action })).into_response()
}

// ---------------------------------------------------------------------------
// POST /ingest
// ---------------------------------------------------------------------------

/// Secondary staging write path. Fire-and-forget: the response does not
/// wait for the database writes.
pub(crate) async fn ingest(
    State(st): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Response {
    let task_count = req.tasks.len();

    let pool = match (&st.pool, st.cfg.enable_db_index) {
        (Some(pool), true) => pool.clone(),
        _ => {
            return (
                StatusCode::OK,
                Json(IngestResponse {
                    status: "disabled",
                    tasks: 0,
                }),
            )
                .into_response();
        }
    };

    let project_id = coerce_str(&req.project_id).unwrap_or_default();
    if project_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "missing project_id".to_string(),
            }),
        )
            .into_response();
    }

    let tasks: Vec<StagingTask> = req
        .tasks
        .iter()
        .filter_map(|t| {
            let task_id = t.get("id").and_then(coerce_str)?;
            let data = t.get("data").cloned().unwrap_or_else(|| t.clone());
            Some(StagingTask { task_id, data })
        })
        .collect();
    let annotations = req.annotations;

    tokio::spawn(async move {
        match annex_db::staging_upsert_tasks(&pool, &project_id, &tasks).await {
            Ok(n) => debug!(project_id = %project_id, tasks = n, "staging tasks written"),
            Err(err) => warn!(project_id = %project_id, error = %err, "staging task write failed"),
        }
        match annex_db::staging_insert_annotations(&pool, &project_id, &annotations).await {
            Ok(n) => debug!(project_id = %project_id, annotations = n, "staging annotations written"),
            Err(err) => {
                warn!(project_id = %project_id, error = %err, "staging annotation write failed")
            }
        }
    });

    (
        StatusCode::OK,
        Json(IngestResponse {
            status: "ok",
            tasks: task_count,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let db = match &st.pool {
        None => "disabled",
        Some(pool) => {
            match tokio::time::timeout(HEALTH_PING_TIMEOUT, annex_db::ping(pool)).await {
                Ok(Ok(())) => "ok",
                _ => "down",
            }
        }
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            db,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

pub(crate) async fn metrics_exposition(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        st.prometheus.render(),
    )
}

// ---------------------------------------------------------------------------
// GET /audit/source
// ---------------------------------------------------------------------------

/// Trace a source object (by canonical tag) back to its outbox rows.
pub(crate) async fn audit_source(
    State(st): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Response {
    let Some(pool) = &st.pool else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "persistence disabled".to_string(),
            }),
        )
            .into_response();
    };

    if params.tag.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "missing tag parameter".to_string(),
            }),
        )
            .into_response();
    }

    let include_payload = params
        .include_payload
        .as_deref()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    match annex_db::audit_by_source_tag(pool, &params.tag).await {
        Ok(rows) => {
            let items = rows
                .into_iter()
                .map(|r| AuditItem {
                    id: r.id,
                    event_id: r.event_id,
                    project_id: r.project_id,
                    schema_version: r.schema_version,
                    target_repo: r.target_repo,
                    task_type: r.task_type,
                    vertical: r.vertical,
                    source_tag: r.source_tag,
                    shard_path: r.shard_path,
                    created_at: r.created_at,
                    processed_at: r.processed_at,
                    payload: include_payload.then_some(r.payload),
                })
                .collect();
            (StatusCode::OK, Json(AuditResponse { items })).into_response()
        }
        Err(err) => {
            error!(tag = %params.tag, error = %err, "audit lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "audit lookup failed".to_string(),
                }),
            )
                .into_response()
        }
    }
}
