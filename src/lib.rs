// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod store;
pub mod timestamp;
pub mod tracker;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::TrackerConfig;
pub use crate::entry::Entry;
pub use crate::ingest::scheduler::{PollOutcome, PollScheduler, TrackerEvent};
pub use crate::store::{EntryStore, LoadOrder};
pub use crate::tracker::{PollReport, Tracker};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::ingest::fetch::HttpFetcher;
use crate::ingest::types::FeedFetcher;

/// Everything the server needs, wired from one config.
pub struct App {
    pub scheduler: Arc<PollScheduler>,
    pub router: axum::Router,
}

/// Build the full app: store, tracker, scheduler and the HTTP router
/// (including `/metrics`).
pub fn build_app(cfg: &TrackerConfig) -> anyhow::Result<App> {
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(HttpFetcher::new(cfg.fetch_timeout_secs));
    build_app_with(cfg, fetcher)
}

/// Same as [`build_app`] with a caller-supplied fetcher (tests use a static one).
pub fn build_app_with(cfg: &TrackerConfig, fetcher: Arc<dyn FeedFetcher>) -> anyhow::Result<App> {
    let metrics = crate::metrics::Metrics::init(cfg)?;

    let store = Arc::new(
        EntryStore::open(&cfg.db_path, cfg.load_order)
            .with_context(|| format!("opening entry store at {}", cfg.db_path.display()))?,
    );
    let tracker = Arc::new(Tracker::new(store, fetcher, cfg));
    let scheduler = PollScheduler::new(
        tracker,
        Duration::from_secs(cfg.poll_interval_secs),
        cfg.feed_url.clone(),
    );

    let router = api::router(AppState::new(Arc::clone(&scheduler), cfg)).merge(metrics.router());
    Ok(App { scheduler, router })
}
