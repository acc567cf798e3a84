//! Environment-driven configuration.
//!
//! All knobs come from `ANNEX_*` env vars (production injects them;
//! `.env.local` covers dev). An empty `ANNEX_DATABASE_URL` is legal: the
//! daemon then runs without persistence and the outbox is disabled.

use std::net::SocketAddr;
use std::time::Duration;

use annex_outbox::{EnqueueConfig, ProcessorConfig};
use annex_routing::RouterConfig;
use anyhow::{ensure, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// `None` disables persistence (and with it the outbox processor).
    pub database_url: Option<String>,
    pub remote_token: String,
    /// Base URL of the remote repository commit API.
    pub remote_base_url: String,
    pub default_repo: String,
    pub ner_repo: Option<String>,
    pub docling_repo: Option<String>,
    pub branch: String,
    pub schema_version: String,
    pub default_vertical: String,
    pub outbox_batch_size: i64,
    pub outbox_interval: Duration,
    pub outbox_lock_timeout: Duration,
    pub outbox_max_attempts: i32,
    /// Gates the secondary staging write path behind POST /ingest.
    pub enable_db_index: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env_str("ANNEX_LISTEN_ADDR", "127.0.0.1:8787")
            .parse()
            .context("ANNEX_LISTEN_ADDR is not a valid socket address")?;

        let cfg = Self {
            listen_addr,
            database_url: env_opt("ANNEX_DATABASE_URL"),
            remote_token: env_str("ANNEX_REMOTE_TOKEN", ""),
            remote_base_url: env_str("ANNEX_REMOTE_BASE_URL", "https://hub.invalid/api/v1/repos"),
            default_repo: env_str("ANNEX_DEFAULT_REPO", "annotations/raw"),
            ner_repo: env_opt("ANNEX_NER_REPO"),
            docling_repo: env_opt("ANNEX_DOCLING_REPO"),
            branch: env_str("ANNEX_BRANCH", "main"),
            schema_version: env_str("ANNEX_SCHEMA_VERSION", "v1"),
            default_vertical: env_str("ANNEX_DEFAULT_VERTICAL", "maritime"),
            outbox_batch_size: env_parse("ANNEX_OUTBOX_BATCH_SIZE", 100)?,
            outbox_interval: Duration::from_secs(env_parse("ANNEX_OUTBOX_INTERVAL_SECS", 15)?),
            outbox_lock_timeout: Duration::from_secs(env_parse(
                "ANNEX_OUTBOX_LOCK_TIMEOUT_SECS",
                300,
            )?),
            outbox_max_attempts: env_parse("ANNEX_OUTBOX_MAX_ATTEMPTS", 12)?,
            enable_db_index: env_bool("ANNEX_ENABLE_DB_INDEX"),
        };

        ensure!(cfg.outbox_batch_size > 0, "ANNEX_OUTBOX_BATCH_SIZE must be > 0");
        ensure!(cfg.outbox_max_attempts > 0, "ANNEX_OUTBOX_MAX_ATTEMPTS must be > 0");

        Ok(cfg)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            default_repo: self.default_repo.clone(),
            ner_repo: self.ner_repo.clone(),
            docling_repo: self.docling_repo.clone(),
            default_vertical: self.default_vertical.clone(),
        }
    }

    pub fn enqueue_config(&self) -> EnqueueConfig {
        EnqueueConfig {
            router: self.router_config(),
            schema_version: self.schema_version.clone(),
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            batch_size: self.outbox_batch_size,
            poll_interval: self.outbox_interval,
            lock_timeout: self.outbox_lock_timeout,
            max_attempts: self.outbox_max_attempts,
            schema_version: self.schema_version.clone(),
            default_repo: self.default_repo.clone(),
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.parse().with_context(|| format!("invalid {key}: {v}")),
        _ => Ok(default),
    }
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
