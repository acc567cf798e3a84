//! Response/request types for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// POST /webhook always answers 200 on a parseable body; `status` tells an
/// operator (not the upstream) what happened.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// POST /ingest request body. `project_id` is string-coerced; tasks and
/// annotations are carried as opaque documents.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub project_id: Value,
    #[serde(default)]
    pub tasks: Vec<Value>,
    #[serde(default)]
    pub annotations: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    /// "ok" | "down" | "disabled"
    pub db: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub tag: String,
    #[serde(default)]
    pub include_payload: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub items: Vec<AuditItem>,
}

#[derive(Debug, Serialize)]
pub struct AuditItem {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}
