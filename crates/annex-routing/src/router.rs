//! Router & validator.
//!
//! `route` decides `(repo, task kind, vertical)` from payload introspection;
//! `validate` decides whether the payload carries enough shape to enqueue.
//! Both scan `annotation.result` and match element types case-insensitively.

use annex_schemas::{Routing, TaskKind, WebhookPayload};
use serde_json::Value;

/// Routing knobs, resolved from configuration by the caller.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub default_repo: String,
    /// Destination for NER-classified payloads; falls back to `default_repo`.
    pub ner_repo: Option<String>,
    /// Destination for Docling-classified payloads; falls back to `default_repo`.
    pub docling_repo: Option<String>,
    pub default_vertical: String,
}

/// Only created/updated annotation events are eligible for enqueue.
pub fn action_eligible(action: &str) -> bool {
    action.eq_ignore_ascii_case("annotation_created")
        || action.eq_ignore_ascii_case("annotation_updated")
}

/// Derive the routing decision for one payload.
///
/// The first classifying element of `annotation.result` wins; payloads with
/// no classifying element keep `TaskKind::Other` and the default repo.
pub fn route(payload: &WebhookPayload, cfg: &RouterConfig) -> Routing {
    let vertical = payload
        .task_data()
        .get("vertical")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| cfg.default_vertical.clone());

    let mut kind = TaskKind::Other;
    let mut repo = cfg.default_repo.clone();

    if let Some(result) = payload.annotation_result() {
        for element in result {
            match classify_element(element) {
                Some(TaskKind::Ner) => {
                    kind = TaskKind::Ner;
                    if let Some(r) = &cfg.ner_repo {
                        repo = r.clone();
                    }
                    break;
                }
                Some(TaskKind::Docling) => {
                    kind = TaskKind::Docling;
                    if let Some(r) = &cfg.docling_repo {
                        repo = r.clone();
                    }
                    break;
                }
                _ => {}
            }
        }
    }

    Routing {
        repo,
        kind,
        vertical,
    }
}

fn classify_element(element: &Value) -> Option<TaskKind> {
    let ty = element.get("type")?.as_str()?;
    if ty.eq_ignore_ascii_case("labels") || ty.eq_ignore_ascii_case("choices") {
        Some(TaskKind::Ner)
    } else if ty.eq_ignore_ascii_case("rectanglelabels") || ty.eq_ignore_ascii_case("polygonlabels")
    {
        Some(TaskKind::Docling)
    } else {
        None
    }
}

/// Validate the payload against the shape its classification requires.
///
/// Unknown kinds (including `Other`) are accepted unconditionally; the
/// pipeline is permissive about result shapes it does not understand.
pub fn validate(payload: &WebhookPayload, kind: TaskKind) -> Result<(), &'static str> {
    let result = match payload.annotation_result() {
        Some(r) if !r.is_empty() => r,
        _ => return Err("annotation.result missing or empty"),
    };

    match kind {
        TaskKind::Ner => {
            if result.iter().any(is_valid_ner_span) {
                Ok(())
            } else {
                Err("no valid NER spans")
            }
        }
        TaskKind::Docling => {
            if result.iter().any(is_valid_docling_box) {
                Ok(())
            } else {
                Err("no valid Docling boxes")
            }
        }
        TaskKind::Other => Ok(()),
    }
}

/// A NER span needs numeric start/end and a non-empty labels array.
fn is_valid_ner_span(element: &Value) -> bool {
    if classify_element(element) != Some(TaskKind::Ner) {
        return false;
    }
    let Some(value) = element.get("value") else {
        return false;
    };
    let has_bounds = value.get("start").map_or(false, Value::is_number)
        && value.get("end").map_or(false, Value::is_number);
    let has_labels = value
        .get("labels")
        .and_then(Value::as_array)
        .map_or(false, |l| !l.is_empty());
    has_bounds && has_labels
}

/// A Docling box needs numeric x/y/width/height.
fn is_valid_docling_box(element: &Value) -> bool {
    if classify_element(element) != Some(TaskKind::Docling) {
        return false;
    }
    let Some(value) = element.get("value") else {
        return false;
    };
    ["x", "y", "width", "height"]
        .iter()
        .all(|k| value.get(*k).map_or(false, Value::is_number))
}
