//! Shared runtime state for annex-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum; this module owns
//! nothing async itself. The pool is `None` when the daemon runs without
//! persistence.

use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;

use crate::config::Config;

/// Static build metadata included in the health response.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub cfg: Config,
    pub pool: Option<PgPool>,
    pub build: BuildInfo,
    /// Renders the Prometheus exposition for GET /metrics.
    pub prometheus: PrometheusHandle,
}

impl AppState {
    pub fn new(cfg: Config, pool: Option<PgPool>, prometheus: PrometheusHandle) -> Self {
        Self {
            cfg,
            pool,
            build: BuildInfo {
                service: "annex-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            prometheus,
        }
    }
}
