//! annex-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing and metrics, builds
//! the shared state, spawns the outbox processor, wires middleware, and
//! starts the HTTP server. All route handlers live in `routes.rs`; all
//! shared state types live in `state.rs`.

use std::sync::Arc;

use annex_commit::ClientCache;
use annex_daemon::{config::Config, routes, state, telemetry};
use annex_outbox::Processor;
use anyhow::Context;
use tokio::sync::watch;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = Config::from_env()?;
    let prometheus = telemetry::install()?;

    let pool = match &cfg.database_url {
        Some(url) => {
            let pool = annex_db::connect(url).await?;
            annex_db::migrate(&pool).await?;
            Some(pool)
        }
        None => {
            warn!("ANNEX_DATABASE_URL not set; running without persistence, outbox disabled");
            None
        }
    };

    // Shutdown fans out to the processor and the HTTP server; the processor
    // finishes its in-flight group before exiting.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let processor_handle = pool.as_ref().map(|pool| {
        let clients = ClientCache::new(
            cfg.remote_token.clone(),
            cfg.branch.clone(),
            cfg.remote_base_url.clone(),
        );
        let processor = Processor::new(pool.clone(), clients, cfg.processor_config());
        tokio::spawn(processor.run(shutdown_rx.clone()))
    });

    let addr = cfg.listen_addr;
    let shared = Arc::new(state::AppState::new(cfg, pool, prometheus));

    let app = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    info!("annex-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server crashed")?;

    // Let the processor reach its next safe point before the runtime drops.
    if let Some(handle) = processor_handle {
        let _ = handle.await;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
