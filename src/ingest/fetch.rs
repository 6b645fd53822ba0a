// src/ingest/fetch.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;

use crate::ingest::types::FeedFetcher;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

/// Plain HTTP fetch. Challenge pages are logged, not solved.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    next_agent: AtomicUsize,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            next_agent: AtomicUsize::new(0),
        }
    }

    fn user_agent(&self) -> &'static str {
        let i = self.next_agent.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[i % USER_AGENTS.len()]
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let agent = self.user_agent();
        tracing::debug!(target: "ingest", %url, agent, "fetching feed");

        let resp = match self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, agent)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en")
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                counter!("tracker_fetch_errors_total").increment(1);
                return Err(e).context("feed http get()");
            }
        };

        let status = resp.status();
        if !status.is_success() {
            counter!("tracker_fetch_errors_total").increment(1);
            bail!("feed returned status {status}");
        }
        let body = resp.text().await.context("feed http .text()")?;

        if looks_like_challenge(&body) {
            tracing::warn!(target: "ingest", %url, "response looks like a challenge page; content may be unusable");
        }
        if body.trim().is_empty() {
            tracing::warn!(target: "ingest", %url, "fetched body is empty");
        }
        Ok(body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn looks_like_challenge(body: &str) -> bool {
    body.contains("Just a moment...") || body.contains("challenge-platform")
}

/// Serves in-memory markup, swappable at runtime. Offline runs and tests.
#[derive(Default)]
pub struct StaticFetcher {
    markup: RwLock<String>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: RwLock::new(markup.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_markup(&self, markup: impl Into<String>) {
        *self.markup.write() = markup.into();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.markup.read().clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
