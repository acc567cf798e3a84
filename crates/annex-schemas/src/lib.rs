//! annex-schemas
//!
//! Shared wire types for the annotation pipeline. The webhook payload is
//! effectively untyped at the boundary; this crate deserializes only the
//! fields the router and validator actually inspect and carries the rest
//! through as opaque `serde_json::Value` sub-documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Producer tag stamped into every serialized annotation record.
pub const PRODUCER_SOURCE: &str = "annex-webhook";

// ---------------------------------------------------------------------------
// WebhookPayload
// ---------------------------------------------------------------------------

/// Incoming webhook body from the annotation platform.
///
/// All sub-fields default to `Value::Null` so a partially-populated body
/// still parses; the validator decides what is actually required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub annotation: Value,
    #[serde(default)]
    pub task: Value,
    #[serde(default)]
    pub project: Value,
}

impl WebhookPayload {
    /// `project.id`, string-coerced (the platform sends numbers).
    pub fn project_id(&self) -> Option<String> {
        coerce_str(self.project.get("id")?)
    }

    pub fn project_title(&self) -> Option<String> {
        self.project
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// `task.id`, string-coerced.
    pub fn task_id(&self) -> Option<String> {
        coerce_str(self.task.get("id")?)
    }

    /// The nested `task.data` sub-document (`Null` if absent).
    pub fn task_data(&self) -> &Value {
        self.task.get("data").unwrap_or(&Value::Null)
    }

    /// `annotation.result` as an array, if present.
    pub fn annotation_result(&self) -> Option<&Vec<Value>> {
        self.annotation.get("result")?.as_array()
    }

    /// Annotator identity: `completed_by.email`, else `.username`, else empty.
    pub fn completed_by(&self) -> String {
        let cb = match self.annotation.get("completed_by") {
            Some(v) => v,
            None => return String::new(),
        };
        for key in ["email", "username"] {
            if let Some(s) = cb.get(key).and_then(|v| v.as_str()) {
                if !s.is_empty() {
                    return s.to_string();
                }
            }
        }
        String::new()
    }
}

/// String-coerce a JSON scalar: strings pass through, numbers stringify.
pub fn coerce_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

/// Classification of the annotation shape, derived from `annotation.result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Span labeling (`labels` / `choices` result elements).
    Ner,
    /// Document layout bounding boxes (`rectanglelabels` / `polygonlabels`).
    Docling,
    /// Anything else; accepted permissively and routed to the default repo.
    Other,
}

impl TaskKind {
    /// Column/path representation. `Other` is the empty string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Ner => "ner",
            TaskKind::Docling => "docling",
            TaskKind::Other => "",
        }
    }
}

/// Routing decision for one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub repo: String,
    pub kind: TaskKind,
    pub vertical: String,
}

// ---------------------------------------------------------------------------
// SourceRef
// ---------------------------------------------------------------------------

/// Canonical reference to the source object an annotation was made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub bucket: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_version_id: Option<String>,
    /// The original URL the reference was parsed from, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SourceRef {
    /// `s3://<bucket>/<key>` with `#<version>` appended when versioned.
    /// Empty when bucket or key is unknown.
    pub fn canonical_tag(&self) -> String {
        if self.bucket.is_empty() || self.key.is_empty() {
            return String::new();
        }
        match &self.s3_version_id {
            Some(v) if !v.is_empty() => format!("s3://{}/{}#{}", self.bucket, self.key, v),
            _ => format!("s3://{}/{}", self.bucket, self.key),
        }
    }
}

// ---------------------------------------------------------------------------
// AnnotationRecord
// ---------------------------------------------------------------------------

/// The durable record serialized into the outbox `payload` column and,
/// later, into one JSONL line of a committed shard. `event_id` must be
/// present in every serialized record: it is the downstream dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub event_id: String,
    pub action: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_title: Option<String>,
    pub task_id: String,
    pub task_data: Value,
    pub annotation: Value,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub completed_by: String,
    pub schema_version: String,
    pub source: String,
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,
}
