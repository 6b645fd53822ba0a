//! Announcement tracker binary.
//! Loads config, opens the store, and serves the HTTP/WebSocket API while the
//! poll scheduler runs in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use announcement_tracker::{build_app, PollScheduler, TrackerConfig};

/// Human-readable logs by default; `TRACKER_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("announcement_tracker=info,tower_http=warn,warn"));

    let json = std::env::var("TRACKER_LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

/// Resolves on Ctrl-C after the poll loop has wound down.
async fn shutdown_signal(scheduler: Arc<PollScheduler>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    scheduler.stop().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = TrackerConfig::load_default()?;
    tracing::info!(
        feed = %cfg.feed_url,
        db = %cfg.db_path.display(),
        max_stored = cfg.max_stored,
        interval_secs = cfg.poll_interval_secs,
        "tracker config loaded"
    );

    let app = build_app(&cfg)?;
    tracing::info!(
        stored = app.scheduler.tracker().stored_count(),
        "entry store ready"
    );

    if cfg.autostart {
        app.scheduler.start(cfg.feed_url.clone()).await;
    }

    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr {:?}", cfg.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&app.scheduler)))
        .await
        .context("http server")?;

    tracing::info!("tracker stopped");
    Ok(())
}
