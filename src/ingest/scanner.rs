// src/ingest/scanner.rs
//! Classify a freshly fetched, newest-first batch as known/new.
//!
//! Lookup is cache first, store on miss. A store hit is admitted to the cache.
//! After `threshold` consecutive known items the rest of the batch is assumed
//! to be older material and is not examined. Out-of-order feeds can hide new
//! items behind such a run; that is accepted.

use metrics::counter;

use crate::cache::MembershipCache;
use crate::entry::Entry;
use crate::ingest::types::RawItem;
use crate::store::EntryStore;

pub const DEFAULT_EARLY_EXIT_THRESHOLD: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// New entries, in scan order.
    pub candidates: Vec<Entry>,
    /// Items whose identifier was resolved.
    pub examined: usize,
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Scanner {
    threshold: usize,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(DEFAULT_EARLY_EXIT_THRESHOLD)
    }
}

impl Scanner {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn scan(
        &self,
        items: &[RawItem],
        cache: &mut MembershipCache,
        store: &EntryStore,
    ) -> ScanOutcome {
        let mut candidates = Vec::new();
        let mut consecutive_known = 0usize;
        let mut examined = 0usize;
        let mut stopped_early = false;

        for (i, raw) in items.iter().enumerate() {
            if consecutive_known >= self.threshold {
                stopped_early = true;
                tracing::debug!(
                    target: "ingest",
                    at = i,
                    remaining = items.len() - i,
                    "early exit after consecutive known items"
                );
                break;
            }

            let entry = Entry::from_parts(
                raw.pub_date.as_deref(),
                raw.title.as_deref(),
                raw.description.as_deref(),
                raw.link.as_deref(),
            );
            examined += 1;

            if is_known(&entry.identifier, cache, store) {
                consecutive_known += 1;
            } else {
                consecutive_known = 0;
                if entry.link.is_none() {
                    tracing::debug!(
                        target: "ingest",
                        title = %truncate(&entry.title, 30),
                        "link missing; using content hash as identifier"
                    );
                }
                candidates.push(entry);
            }
        }

        if stopped_early {
            counter!("tracker_early_exit_total").increment(1);
        }

        ScanOutcome {
            candidates,
            examined,
            stopped_early,
        }
    }
}

fn is_known(identifier: &str, cache: &mut MembershipCache, store: &EntryStore) -> bool {
    if cache.contains(identifier) {
        return true;
    }
    if store.exists_by_id(identifier) {
        cache.admit([identifier]);
        return true;
    }
    false
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
