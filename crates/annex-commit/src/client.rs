//! Remote commit client.
//!
//! One HTTP POST per commit against `<base>/<repo>/commit/<branch>` with
//! bearer auth and a bounded timeout. Any status ≥ 300 is a failure that
//! carries the status code and the first 4 KiB of the response body.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

/// Request timeout for a single commit POST.
const COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How many bytes of an error response body are carried into the error
/// message.
const ERROR_BODY_CAP: usize = 4096;

/// A single file operation inside a commit. `content` is the base64-encoded
/// file body; the only supported kind is add-or-update.
#[derive(Debug, Clone)]
pub struct CommitOperation {
    /// Forward-slash separated path inside the repository.
    pub path: String,
    /// Base64-encoded file body.
    pub content: String,
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    operations: Vec<WireOperation<'a>>,
    commit_message: &'a str,
    create_pr: bool,
}

#[derive(Serialize)]
struct WireOperation<'a> {
    operation: &'static str,
    path: &'a str,
    content: &'a str,
}

// ---------------------------------------------------------------------------
// CommitClient
// ---------------------------------------------------------------------------

/// Commit client bound to one `(repo, branch)` pair.
#[derive(Debug, Clone)]
pub struct CommitClient {
    repo: String,
    branch: String,
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl CommitClient {
    /// `branch` falls back to `"main"` when empty. The `reqwest::Client` is
    /// passed in so per-repo clients share one connection pool.
    pub fn new(
        repo: impl Into<String>,
        token: impl Into<String>,
        branch: impl Into<String>,
        base_url: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        let branch = branch.into();
        Self {
            repo: repo.into(),
            branch: if branch.is_empty() {
                "main".to_string()
            } else {
                branch
            },
            token: token.into(),
            base_url: base_url.into(),
            http,
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/{}/commit/{}",
            self.base_url.trim_end_matches('/'),
            self.repo,
            self.branch
        )
    }

    /// Submit one commit. No retries: a network error or any response with
    /// status ≥ 300 surfaces as an error and the caller decides what to do.
    pub async fn commit(&self, operations: &[CommitOperation], message: &str) -> Result<()> {
        if operations.is_empty() {
            return Err(anyhow!("commit requires at least one operation"));
        }

        let body = CommitRequest {
            operations: operations
                .iter()
                .map(|op| WireOperation {
                    operation: "addOrUpdate",
                    path: &op.path,
                    content: &op.content,
                })
                .collect(),
            commit_message: message,
            create_pr: false,
        };

        let resp = self
            .http
            .post(self.commit_url())
            .bearer_auth(&self.token)
            .timeout(COMMIT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("commit request to repo {} failed", self.repo))?;

        let status = resp.status();
        if status.as_u16() >= 300 {
            let body = resp.bytes().await.unwrap_or_default();
            let snippet = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_CAP)]);
            return Err(anyhow!(
                "commit to repo {} rejected: status={} body={}",
                self.repo,
                status.as_u16(),
                snippet
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ClientCache
// ---------------------------------------------------------------------------

/// Lazily-constructed per-repo clients sharing one connection pool.
///
/// Owned and mutated by the single processor task; wrap in a mutex before
/// sharing across tasks.
pub struct ClientCache {
    token: String,
    branch: String,
    base_url: String,
    http: reqwest::Client,
    clients: HashMap<String, CommitClient>,
}

impl ClientCache {
    pub fn new(
        token: impl Into<String>,
        branch: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            branch: branch.into(),
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            clients: HashMap::new(),
        }
    }

    pub fn client_for(&mut self, repo: &str) -> &CommitClient {
        if !self.clients.contains_key(repo) {
            let client = CommitClient::new(
                repo,
                self.token.clone(),
                self.branch.clone(),
                self.base_url.clone(),
                self.http.clone(),
            );
            self.clients.insert(repo.to_string(), client);
        }
        &self.clients[repo]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_url_shape_and_branch_default() {
        let c = CommitClient::new("org/data", "t", "", "https://hub/api/v1/repos/", reqwest::Client::new());
        assert_eq!(c.commit_url(), "https://hub/api/v1/repos/org/data/commit/main");

        let c = CommitClient::new("org/data", "t", "dev", "https://hub/api/v1/repos", reqwest::Client::new());
        assert_eq!(c.commit_url(), "https://hub/api/v1/repos/org/data/commit/dev");
    }

    #[test]
    fn cache_reuses_clients_per_repo() {
        let mut cache = ClientCache::new("t", "main", "https://hub/api");
        let a = cache.client_for("repo/a").repo().to_string();
        let b = cache.client_for("repo/b").repo().to_string();
        let a2 = cache.client_for("repo/a").repo().to_string();
        assert_eq!(a, "repo/a");
        assert_eq!(b, "repo/b");
        assert_eq!(a2, "repo/a");
        assert_eq!(cache.clients.len(), 2);
    }
}
