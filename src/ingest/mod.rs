// src/ingest/mod.rs
pub mod committer;
pub mod fetch;
pub mod parser;
pub mod scanner;
pub mod scheduler;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("tracker_polls_total", "Poll cycles started.");
        describe_counter!(
            "tracker_polls_skipped_total",
            "Polls skipped because another cycle was in flight."
        );
        describe_counter!("tracker_fetch_errors_total", "Feed fetch failures.");
        describe_counter!(
            "tracker_parse_empty_total",
            "Fetches where neither parser found any <item>."
        );
        describe_counter!("tracker_items_parsed_total", "Raw items parsed from feeds.");
        describe_counter!("tracker_new_items_total", "Entries committed as new.");
        describe_counter!(
            "tracker_early_exit_total",
            "Scans stopped by the consecutive-known heuristic."
        );
        describe_counter!(
            "tracker_commit_conflicts_total",
            "Batch inserts that hit a unique conflict and fell back to per-row inserts."
        );
        describe_counter!(
            "tracker_store_errors_total",
            "Store operations that failed and were treated as no-ops."
        );
        describe_counter!("tracker_trimmed_total", "Rows evicted by retention.");
        describe_histogram!("tracker_parse_ms", "Feed parse time in milliseconds.");
        describe_histogram!("tracker_poll_ms", "Full poll cycle time in milliseconds.");
        describe_gauge!("tracker_stored_entries", "Rows currently in the entry store.");
        describe_gauge!("tracker_last_poll_ts", "Unix ts of the last completed poll.");
        describe_gauge!("tracker_max_stored", "Configured retention cap.");
        describe_gauge!("tracker_poll_interval_secs", "Configured poll interval.");
    });
}
