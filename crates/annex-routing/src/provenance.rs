//! Provenance extraction.
//!
//! Computes a canonical source object reference (`s3://bucket/key#version`)
//! from task data so every outbox row can be traced back to the immutable
//! object it annotates. Parsing is best-effort: a URL that does not look
//! like S3 simply yields no reference.

use annex_schemas::SourceRef;
use percent_encoding::percent_decode_str;
use serde_json::Value;
use url::Url;

/// Candidate URL keys, probed in order. First non-empty string wins.
const URL_KEYS: [&str; 5] = ["pdf_url", "url", "file", "image", "s3_url"];

/// Extract a source reference from the `task.data` sub-document.
///
/// Returns `None` when neither a parseable URL nor explicit
/// `s3_bucket`/`s3_key` fields are present.
pub fn extract_source(task_data: &Value) -> Option<SourceRef> {
    let url = URL_KEYS
        .iter()
        .filter_map(|k| task_data.get(*k))
        .filter_map(|v| v.as_str())
        .find(|s| !s.is_empty());

    if let Some(raw) = url {
        if let Some(mut parsed) = parse_s3_url(raw) {
            parsed.url = Some(raw.to_string());
            // Explicit version field fills in when the URL carried none.
            if parsed.s3_version_id.is_none() {
                parsed.s3_version_id = str_field(task_data, "s3_version_id");
            }
            return Some(parsed);
        }
    }

    // Explicit fields are the fallback when no URL parsed.
    let bucket = str_field(task_data, "s3_bucket")?;
    let key = str_field(task_data, "s3_key")?;
    Some(SourceRef {
        bucket,
        key,
        s3_version_id: str_field(task_data, "s3_version_id"),
        url: url.map(str::to_string),
    })
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Best-effort S3 URL parse covering the three shapes we see in task data:
/// `s3://bucket/key`, virtual-hosted `bucket.s3[.region].amazonaws.com/key`
/// and path-style `s3[.region].amazonaws.com/bucket/key`.
fn parse_s3_url(raw: &str) -> Option<SourceRef> {
    let url = Url::parse(raw).ok()?;

    let version = url
        .query_pairs()
        .find(|(k, _)| k == "versionId")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty());

    if url.scheme() == "s3" {
        let bucket = url.host_str()?.to_string();
        let key = decode_path(url.path());
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        return Some(SourceRef {
            bucket,
            key,
            s3_version_id: version,
            url: None,
        });
    }

    let host = url.host_str()?;
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 || labels[labels.len() - 2] != "amazonaws" || labels[labels.len() - 1] != "com"
    {
        return None;
    }

    let is_s3_label = |l: &str| l == "s3" || l.starts_with("s3-");

    if is_s3_label(labels[0]) {
        // Path style: first segment is the bucket, remainder the key.
        let path = decode_path(url.path());
        let mut parts = path.splitn(2, '/');
        let bucket = parts.next().unwrap_or_default().to_string();
        let key = parts.next().unwrap_or_default().to_string();
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(SourceRef {
            bucket,
            key,
            s3_version_id: version,
            url: None,
        })
    } else if labels.len() >= 4 && is_s3_label(labels[1]) {
        // Virtual-hosted style: first host label is the bucket.
        let bucket = labels[0].to_string();
        let key = decode_path(url.path());
        if key.is_empty() {
            return None;
        }
        Some(SourceRef {
            bucket,
            key,
            s3_version_id: version,
            url: None,
        })
    } else {
        None
    }
}

/// URL-decode a path and strip the leading slash.
fn decode_path(path: &str) -> String {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    percent_decode_str(trimmed).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn virtual_hosted_url_with_version() {
        let td = json!({"pdf_url": "https://b.s3.amazonaws.com/k?versionId=v"});
        let r = extract_source(&td).unwrap();
        assert_eq!(r.bucket, "b");
        assert_eq!(r.key, "k");
        assert_eq!(r.s3_version_id.as_deref(), Some("v"));
        assert_eq!(r.url.as_deref(), Some("https://b.s3.amazonaws.com/k?versionId=v"));
        assert_eq!(r.canonical_tag(), "s3://b/k#v");
    }

    #[test]
    fn virtual_hosted_regional_url() {
        let td = json!({"url": "https://docs.s3.eu-west-1.amazonaws.com/scans/page%201.pdf"});
        let r = extract_source(&td).unwrap();
        assert_eq!(r.bucket, "docs");
        assert_eq!(r.key, "scans/page 1.pdf");
        assert!(r.s3_version_id.is_none());
    }

    #[test]
    fn path_style_url() {
        let td = json!({"file": "https://s3.us-east-1.amazonaws.com/mybucket/a/b/c.png"});
        let r = extract_source(&td).unwrap();
        assert_eq!(r.bucket, "mybucket");
        assert_eq!(r.key, "a/b/c.png");
    }

    #[test]
    fn s3_scheme_url() {
        let td = json!({"s3_url": "s3://bucket/deep/key.pdf"});
        let r = extract_source(&td).unwrap();
        assert_eq!(r.bucket, "bucket");
        assert_eq!(r.key, "deep/key.pdf");
    }

    #[test]
    fn probe_order_prefers_pdf_url() {
        let td = json!({
            "url": "https://other.s3.amazonaws.com/second",
            "pdf_url": "https://first.s3.amazonaws.com/first"
        });
        let r = extract_source(&td).unwrap();
        assert_eq!(r.bucket, "first");
    }

    #[test]
    fn explicit_fields_fallback() {
        let td = json!({
            "pdf_url": "https://example.com/not-s3.pdf",
            "s3_bucket": "b2",
            "s3_key": "k2",
            "s3_version_id": "v2"
        });
        let r = extract_source(&td).unwrap();
        assert_eq!(r.bucket, "b2");
        assert_eq!(r.key, "k2");
        assert_eq!(r.s3_version_id.as_deref(), Some("v2"));
        // The non-S3 URL is still recorded for audit context.
        assert_eq!(r.url.as_deref(), Some("https://example.com/not-s3.pdf"));
    }

    #[test]
    fn nothing_to_extract_returns_none() {
        assert!(extract_source(&json!({})).is_none());
        assert!(extract_source(&json!({"text": "no urls here"})).is_none());
        // Non-S3 URL without explicit fields yields nothing.
        assert!(extract_source(&json!({"url": "https://example.com/a.pdf"})).is_none());
    }

    #[test]
    fn bucket_without_key_is_rejected() {
        assert!(extract_source(&json!({"url": "https://b.s3.amazonaws.com/"})).is_none());
        assert!(extract_source(&json!({"url": "https://s3.amazonaws.com/onlybucket"})).is_none());
    }
}
