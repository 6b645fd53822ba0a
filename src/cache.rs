// src/cache.rs
//! Bounded in-memory set of identifiers confirmed to be in the store.
//!
//! Only identifiers the store has confirmed are ever admitted, so a hit is
//! always a true positive. Misses are expected (cold start, aged-out ids) and
//! fall through to the store.

use std::collections::{HashSet, VecDeque};

#[derive(Debug)]
pub struct MembershipCache {
    set: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl MembershipCache {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            set: HashSet::with_capacity(cap.min(100_000)),
            order: VecDeque::with_capacity(cap.min(100_000)),
            cap,
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.set.contains(identifier)
    }

    /// Admit confirmed identifiers; evicts the oldest-admitted past capacity.
    pub fn admit<I, S>(&mut self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in identifiers {
            let id = id.into();
            if self.set.insert(id.clone()) {
                self.order.push_back(id);
            }
        }
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}
