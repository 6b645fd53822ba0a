// src/ingest/committer.rs
use std::collections::HashSet;

use crate::entry::Entry;
use crate::store::EntryStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Rows that are now durably stored and were not before, in batch order.
    pub inserted: Vec<Entry>,
    /// Candidates dropped because an earlier one in the batch had the same id.
    pub duplicates_in_batch: usize,
}

/// Keep the first occurrence of each identifier, preserving order.
pub fn dedup_by_identifier(candidates: Vec<Entry>) -> (Vec<Entry>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());
    let mut keep = Vec::with_capacity(candidates.len());
    let mut dropped = 0usize;
    for e in candidates {
        if seen.insert(e.identifier.clone()) {
            keep.push(e);
        } else {
            dropped += 1;
        }
    }
    (keep, dropped)
}

/// Dedup within the batch, then let the store insert whatever is still absent.
/// Storage failures surface as an empty `inserted`; those candidates were never
/// marked known, so the next poll retries them.
pub fn commit_batch(store: &EntryStore, candidates: Vec<Entry>) -> CommitOutcome {
    if candidates.is_empty() {
        return CommitOutcome::default();
    }
    let (unique, duplicates_in_batch) = dedup_by_identifier(candidates);
    if duplicates_in_batch > 0 {
        tracing::debug!(target: "ingest", duplicates_in_batch, "dropped in-batch duplicates");
    }
    let inserted = store.insert_batch(&unique);
    CommitOutcome {
        inserted,
        duplicates_in_batch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LoadOrder;

    fn entry(id: &str, title: &str) -> Entry {
        Entry {
            timestamp: String::new(),
            title: title.into(),
            description: "d".into(),
            link: Some(id.into()),
            identifier: id.into(),
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let (keep, dropped) =
            dedup_by_identifier(vec![entry("a", "first"), entry("b", "b"), entry("a", "second")]);
        assert_eq!(dropped, 1);
        assert_eq!(keep.len(), 2);
        assert_eq!(keep[0].title, "first");
    }

    #[test]
    fn commit_reports_only_new_rows() {
        let store = EntryStore::open_in_memory(LoadOrder::OldestFirst).unwrap();
        store.insert_batch(&[entry("a", "a")]);

        let out = commit_batch(
            &store,
            vec![entry("a", "a"), entry("b", "b"), entry("b", "b2"), entry("c", "c")],
        );
        let ids: Vec<&str> = out.inserted.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(out.duplicates_in_batch, 1);
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn empty_batch_is_noop() {
        let store = EntryStore::open_in_memory(LoadOrder::OldestFirst).unwrap();
        assert_eq!(commit_batch(&store, Vec::new()), CommitOutcome::default());
    }
}
