// src/ingest/scheduler.rs
//! Periodic polling with a single-flight guard and live event fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::timestamp::{for_display, DisplayEntry};
use crate::tracker::{PollReport, Tracker};

const EVENT_CAPACITY: usize = 256;

/// Pushed to live subscribers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    NewItems {
        items: Vec<DisplayEntry>,
        count: usize,
        timestamp: String,
    },
    StatusUpdate {
        polling_active: bool,
        url: String,
        timestamp: String,
    },
    Error {
        message: String,
        timestamp: String,
    },
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(PollReport),
    /// Another cycle was still in flight.
    Skipped,
}

#[derive(Default)]
struct Control {
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PollScheduler {
    tracker: Arc<Tracker>,
    interval: Duration,
    events: broadcast::Sender<TrackerEvent>,
    in_flight: AtomicBool,
    active: AtomicBool,
    url: parking_lot::RwLock<String>,
    control: Mutex<Control>,
}

impl PollScheduler {
    pub fn new(tracker: Arc<Tracker>, interval: Duration, default_url: impl Into<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            tracker,
            interval: interval.max(Duration::from_millis(10)),
            events,
            in_flight: AtomicBool::new(false),
            active: AtomicBool::new(false),
            url: parking_lot::RwLock::new(default_url.into()),
            control: Mutex::new(Control::default()),
        })
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn url(&self) -> String {
        self.url.read().clone()
    }

    /// Start polling `url`. Returns false when already active.
    pub async fn start(self: &Arc<Self>, url: impl Into<String>) -> bool {
        let mut control = self.control.lock().await;
        if self.is_active() {
            return false;
        }
        let url = url.into();
        *self.url.write() = url.clone();

        self.active.store(true, Ordering::Release);
        tracing::info!(target: "scheduler", %url, interval_ms = self.interval.as_millis() as u64, "started polling");
        self.publish_status(true, url.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        control.handle = Some(tokio::spawn(async move {
            this.run_loop(url, stop_rx).await;
        }));
        control.stop_tx = Some(stop_tx);
        true
    }

    /// Stop polling. An in-progress cycle finishes first. Returns false when
    /// polling was not active.
    pub async fn stop(&self) -> bool {
        let mut control = self.control.lock().await;
        if !self.is_active() {
            return false;
        }
        if let Some(tx) = control.stop_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = control.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(target: "scheduler", error = %e, "poll loop ended abnormally");
            }
        }
        self.active.store(false, Ordering::Release);

        tracing::info!(target: "scheduler", "stopped polling");
        self.publish_status(false, self.url());
        true
    }

    /// One guarded cycle. Overlapping calls are skipped, not queued.
    pub async fn poll_once(&self, url: &str) -> PollOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            counter!("tracker_polls_skipped_total").increment(1);
            tracing::debug!(target: "scheduler", "poll already in flight; skipping");
            return PollOutcome::Skipped;
        }
        let _guard = FlightGuard(&self.in_flight);

        let report = self.tracker.poll(url).await;

        if let Some(message) = &report.fetch_error {
            let _ = self.events.send(TrackerEvent::Error {
                message: format!("Polling error: {message}"),
                timestamp: now_iso(),
            });
        }
        if !report.new_items.is_empty() {
            tracing::info!(target: "scheduler", count = report.new_items.len(), "broadcasting new items");
            let _ = self.events.send(TrackerEvent::NewItems {
                items: for_display(report.new_items.clone(), chrono::Utc::now()),
                count: report.new_items.len(),
                timestamp: now_iso(),
            });
        }
        PollOutcome::Completed(report)
    }

    async fn run_loop(&self, url: String, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                res = stop_rx.changed() => {
                    if res.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            if *stop_rx.borrow() {
                break;
            }
            self.poll_once(&url).await;
        }
        tracing::debug!(target: "scheduler", "poll loop exited");
    }

    fn publish_status(&self, polling_active: bool, url: String) {
        let _ = self.events.send(TrackerEvent::StatusUpdate {
            polling_active,
            url,
            timestamp: now_iso(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = TrackerEvent::StatusUpdate {
            polling_active: true,
            url: "u".into(),
            timestamp: "t".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "status_update");
        assert_eq!(v["polling_active"], true);

        let ev = TrackerEvent::NewItems {
            items: vec![],
            count: 0,
            timestamp: "t".into(),
        };
        assert_eq!(serde_json::to_value(&ev).unwrap()["type"], "new_items");
    }

    #[test]
    fn flight_guard_resets_flag() {
        let flag = AtomicBool::new(true);
        {
            let _g = FlightGuard(&flag);
        }
        assert!(!flag.load(Ordering::Acquire));
    }
}
