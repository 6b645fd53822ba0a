// src/tracker.rs
//! The ingestion service: one fetch → parse → scan → commit → trim cycle per
//! poll, plus the "initial items" view served to subscribers.
//!
//! Owns the membership cache and the in-memory mirror of stored entries.
//! Both sit behind one lock so only a single cycle mutates them at a time;
//! cross-process writers are handled by the store's unique index.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::MembershipCache;
use crate::config::TrackerConfig;
use crate::entry::Entry;
use crate::ingest::committer::commit_batch;
use crate::ingest::parser::parse_feed_with_mode;
use crate::ingest::scanner::Scanner;
use crate::ingest::types::FeedFetcher;
use crate::store::{EntryStore, LoadOrder};

/// What one poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Entries committed by this cycle, in feed order.
    pub new_items: Vec<Entry>,
    pub parsed: usize,
    pub examined: usize,
    pub stopped_early: bool,
    /// Set when the fetch step failed; the cycle then did nothing else.
    pub fetch_error: Option<String>,
}

struct TrackerState {
    cache: MembershipCache,
    /// Stored entries in insertion order, at most `max_stored`.
    mirror: VecDeque<Entry>,
}

impl TrackerState {
    /// Reload cache and mirror from the store when both are empty
    /// (cold process or lost in-memory state).
    fn refresh_if_empty(&mut self, store: &EntryStore, max_stored: usize) {
        if !self.cache.is_empty() || !self.mirror.is_empty() {
            return;
        }
        let mut loaded = store.load_all();
        if loaded.is_empty() {
            return;
        }
        if store.load_order() == LoadOrder::NewestFirst {
            loaded.reverse();
        }
        self.cache.admit(loaded.iter().map(|e| e.identifier.as_str()));
        self.mirror = loaded.into();
        while self.mirror.len() > max_stored {
            self.mirror.pop_front();
        }
        info!(target: "tracker", items = self.mirror.len(), "seeded cache from store");
    }
}

pub struct Tracker {
    store: Arc<EntryStore>,
    fetcher: Arc<dyn FeedFetcher>,
    scanner: Scanner,
    max_stored: usize,
    state: Mutex<TrackerState>,
}

impl Tracker {
    pub fn new(store: Arc<EntryStore>, fetcher: Arc<dyn FeedFetcher>, cfg: &TrackerConfig) -> Self {
        crate::ingest::ensure_metrics_described();

        let max_stored = cfg.max_stored.max(1);
        let state = TrackerState {
            cache: MembershipCache::with_capacity(cfg.cache_capacity.max(max_stored)),
            mirror: VecDeque::new(),
        };
        // A lowered cap applies to what is already on disk.
        store.trim_to_capacity(max_stored);

        let tracker = Self {
            store,
            fetcher,
            scanner: Scanner::new(cfg.early_exit_threshold),
            max_stored,
            state: Mutex::new(state),
        };
        tracker
            .state
            .lock()
            .refresh_if_empty(&tracker.store, tracker.max_stored);
        gauge!("tracker_stored_entries").set(tracker.store.count() as f64);
        tracker
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    pub fn max_stored(&self) -> usize {
        self.max_stored
    }

    /// All currently stored entries, in the store's configured order.
    pub fn get_initial_items(&self) -> Vec<Entry> {
        let mut state = self.state.lock();
        state.refresh_if_empty(&self.store, self.max_stored);
        let mut out: Vec<Entry> = state.mirror.iter().cloned().collect();
        if self.store.load_order() == LoadOrder::NewestFirst {
            out.reverse();
        }
        out
    }

    /// The `limit` most recently inserted entries, oldest of them first.
    pub fn recent_items(&self, limit: usize) -> Vec<Entry> {
        let mut state = self.state.lock();
        state.refresh_if_empty(&self.store, self.max_stored);
        let skip = state.mirror.len().saturating_sub(limit);
        state.mirror.iter().skip(skip).cloned().collect()
    }

    pub fn stored_count(&self) -> usize {
        self.store.count()
    }

    /// [`Tracker::get_initial_items`] off the async runtime.
    pub async fn load_initial_items(self: &Arc<Self>) -> Vec<Entry> {
        self.blocking("get_initial_items", |t| t.get_initial_items())
            .await
            .unwrap_or_default()
    }

    /// [`Tracker::recent_items`] off the async runtime.
    pub async fn load_recent_items(self: &Arc<Self>, limit: usize) -> Vec<Entry> {
        self.blocking("recent_items", move |t| t.recent_items(limit))
            .await
            .unwrap_or_default()
    }

    /// Run one cycle against `url` and return only the committed new entries.
    pub async fn get_new_items(self: &Arc<Self>, url: &str) -> Vec<Entry> {
        self.poll(url).await.new_items
    }

    /// Run one cycle against `url`. Never fails; failures show up as an
    /// empty report (with `fetch_error` set when the fetch itself failed).
    /// Store work runs on the blocking pool, so a busy database never
    /// stalls the runtime.
    pub async fn poll(self: &Arc<Self>, url: &str) -> PollReport {
        let t0 = Instant::now();
        counter!("tracker_polls_total").increment(1);

        let markup = match self.fetcher.fetch(url).await {
            Ok(m) => m,
            Err(e) => {
                let msg = format!("{e:#}");
                warn!(target: "tracker", %url, fetcher = self.fetcher.name(), error = %msg, "fetch failed");
                return PollReport {
                    fetch_error: Some(msg),
                    ..PollReport::default()
                };
            }
        };
        if markup.trim().is_empty() {
            warn!(target: "tracker", %url, "fetch returned no data; skipping parse");
            return PollReport::default();
        }

        let report = self
            .blocking("ingest_markup", move |t| t.ingest_markup(&markup))
            .await
            .unwrap_or_default();

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("tracker_poll_ms").record(ms);
        gauge!("tracker_last_poll_ts").set(chrono::Utc::now().timestamp() as f64);
        report
    }

    async fn blocking<T, F>(self: &Arc<Self>, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(&Tracker) -> T + Send + 'static,
        T: Send + 'static,
    {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || f(&this)).await {
            Ok(v) => Some(v),
            Err(e) => {
                error!(target: "tracker", op, error = %e, "blocking task failed");
                None
            }
        }
    }

    /// Parse, scan and commit already-fetched markup. Blocks on the store.
    pub fn ingest_markup(&self, markup: &str) -> PollReport {
        let (items, mode) = parse_feed_with_mode(markup);
        if items.is_empty() {
            return PollReport::default();
        }

        let mut state = self.state.lock();
        state.refresh_if_empty(&self.store, self.max_stored);

        let scan = self.scanner.scan(&items, &mut state.cache, &self.store);
        let outcome = commit_batch(&self.store, scan.candidates);

        if !outcome.inserted.is_empty() {
            state
                .cache
                .admit(outcome.inserted.iter().map(|e| e.identifier.as_str()));
            state.mirror.extend(outcome.inserted.iter().cloned());
            while state.mirror.len() > self.max_stored {
                state.mirror.pop_front();
            }
            self.store.trim_to_capacity(self.max_stored);

            for e in &outcome.inserted {
                info!(
                    target: "tracker",
                    title = %e.title.chars().take(50).collect::<String>(),
                    published = %e.timestamp,
                    "new item found"
                );
            }
            counter!("tracker_new_items_total").increment(outcome.inserted.len() as u64);
            gauge!("tracker_stored_entries").set(self.store.count() as f64);
        }
        drop(state);

        info!(
            target: "tracker",
            parsed = items.len(),
            ?mode,
            examined = scan.examined,
            new = outcome.inserted.len(),
            stopped_early = scan.stopped_early,
            "poll cycle done"
        );

        PollReport {
            new_items: outcome.inserted,
            parsed: items.len(),
            examined: scan.examined,
            stopped_early: scan.stopped_early,
            fetch_error: None,
        }
    }
}
