// tests/scheduler.rs
//
// Poll loop lifecycle, single-flight guard and event fan-out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;

use announcement_tracker::ingest::fetch::StaticFetcher;
use announcement_tracker::ingest::types::FeedFetcher;
use announcement_tracker::{
    EntryStore, LoadOrder, PollOutcome, PollScheduler, Tracker, TrackerConfig, TrackerEvent,
};

const URL: &str = "https://feeds.example.test/announcements.xml";

fn feed(ids: &[&str]) -> String {
    let body: String = ids
        .iter()
        .map(|id| {
            format!(
                "<item><title>{id}</title><description>d</description>\
                 <link>https://feeds.example.test/{id}</link></item>"
            )
        })
        .collect();
    format!("<rss><channel>{body}</channel></rss>")
}

fn scheduler_with(fetcher: Arc<dyn FeedFetcher>, interval: Duration) -> Arc<PollScheduler> {
    let store = Arc::new(EntryStore::open_in_memory(LoadOrder::OldestFirst).unwrap());
    let tracker = Arc::new(Tracker::new(store, fetcher, &TrackerConfig::default()));
    PollScheduler::new(tracker, interval, URL)
}

/// Blocks inside `fetch` until released, so a cycle can be held in flight.
struct GatedFetcher {
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
    markup: String,
}

#[async_trait]
impl FeedFetcher for GatedFetcher {
    async fn fetch(&self, _url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.markup.clone())
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

struct FailingFetcher;

#[async_trait]
impl FeedFetcher for FailingFetcher {
    async fn fetch(&self, _url: &str) -> Result<String> {
        anyhow::bail!("connection refused")
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn overlapping_poll_is_skipped_not_queued() {
    let fetcher = Arc::new(GatedFetcher {
        entered: Notify::new(),
        release: Notify::new(),
        calls: AtomicUsize::new(0),
        markup: feed(&["a"]),
    });
    let sched = scheduler_with(fetcher.clone(), Duration::from_secs(60));

    let s1 = Arc::clone(&sched);
    let first = tokio::spawn(async move { s1.poll_once(URL).await });
    fetcher.entered.notified().await;

    assert_eq!(sched.poll_once(URL).await, PollOutcome::Skipped);

    fetcher.release.notify_one();
    match first.await.unwrap() {
        PollOutcome::Completed(report) => assert_eq!(report.new_items.len(), 1),
        PollOutcome::Skipped => panic!("first poll must run"),
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_items_are_broadcast_to_subscribers() {
    let fetcher = Arc::new(StaticFetcher::new(feed(&["a", "b"])));
    let sched = scheduler_with(fetcher.clone(), Duration::from_secs(60));
    let mut rx = sched.subscribe();
    assert_eq!(sched.subscriber_count(), 1);

    sched.poll_once(URL).await;
    match rx.recv().await.unwrap() {
        TrackerEvent::NewItems { items, count, .. } => {
            assert_eq!(count, 2);
            assert_eq!(items[0].entry.title, "a");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // nothing new → nothing broadcast
    sched.poll_once(URL).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn fetch_failure_broadcasts_error_and_keeps_state() {
    let sched = scheduler_with(Arc::new(FailingFetcher), Duration::from_secs(60));
    let mut rx = sched.subscribe();

    match sched.poll_once(URL).await {
        PollOutcome::Completed(report) => {
            assert!(report.new_items.is_empty());
            assert!(report.fetch_error.is_some());
        }
        PollOutcome::Skipped => panic!("nothing else in flight"),
    }
    assert!(matches!(rx.recv().await.unwrap(), TrackerEvent::Error { .. }));
    assert_eq!(sched.tracker().stored_count(), 0);
}

#[tokio::test]
async fn start_polls_until_stopped() {
    let fetcher = Arc::new(StaticFetcher::new(feed(&["a"])));
    let sched = scheduler_with(fetcher.clone(), Duration::from_millis(20));
    let mut rx = sched.subscribe();

    assert!(sched.start(URL).await);
    assert!(sched.is_active());
    assert!(!sched.start(URL).await, "second start is a no-op");
    assert!(matches!(
        rx.recv().await.unwrap(),
        TrackerEvent::StatusUpdate { polling_active: true, .. }
    ));

    let mut waited = 0;
    while fetcher.calls() < 3 && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert!(fetcher.calls() >= 3, "loop should keep polling");

    assert!(sched.stop().await);
    assert!(!sched.is_active());
    let after_stop = fetcher.calls();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(fetcher.calls(), after_stop, "no cycles after stop returns");
    assert!(!sched.stop().await, "stop when inactive is a no-op");
    assert_eq!(sched.tracker().stored_count(), 1);
}

#[tokio::test]
async fn start_switches_url() {
    let sched = scheduler_with(Arc::new(StaticFetcher::default()), Duration::from_secs(60));
    assert_eq!(sched.url(), URL);
    assert!(sched.start("https://other.example.test/rss").await);
    assert_eq!(sched.url(), "https://other.example.test/rss");
    sched.stop().await;
}
