// src/store/mod.rs
//! Durable, size-bounded table of known entries (SQLite via rusqlite).
//!
//! The unique index on `identifier` is the authoritative dedup backstop.
//! Everything the poll path calls contains its own errors: it logs, bumps
//! `tracker_store_errors_total`, and behaves as if the operation had no
//! effect. Only `open*`/`initialize` propagate.

mod schema;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use metrics::counter;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::entry::Entry;
use crate::error::{StoreError, StoreResult};

/// Max bound parameters per `IN (...)` lookup; stays under SQLite's limit.
const EXISTS_CHUNK: usize = 500;

const INSERT_SQL: &str = "INSERT INTO entries (timestamp, title, description, link, identifier, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Row order returned by [`EntryStore::load_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

pub struct EntryStore {
    conn: Mutex<Connection>,
    load_order: LoadOrder,
}

impl EntryStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path, load_order: LoadOrder) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!(target: "store", path = %path.display(), "opening entry store");

        let conn = Connection::open(path)?;
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            warn!(target: "store", error = %e, "could not enable WAL; continuing with default journal");
        }
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = Self {
            conn: Mutex::new(conn),
            load_order,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory(load_order: LoadOrder) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            load_order,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn load_order(&self) -> LoadOrder {
        self.load_order
    }

    /// Ensure table and indexes exist. Idempotent.
    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        schema::run_migrations(&conn)
    }

    /// All stored rows in the configured order. Read errors yield an empty list.
    pub fn load_all(&self) -> Vec<Entry> {
        match self.try_load_all() {
            Ok(v) => v,
            Err(e) => {
                store_failure("load_all", &e);
                Vec::new()
            }
        }
    }

    fn try_load_all(&self) -> StoreResult<Vec<Entry>> {
        let sql = match self.load_order {
            LoadOrder::OldestFirst => {
                "SELECT timestamp, title, description, link, identifier FROM entries ORDER BY id ASC"
            }
            LoadOrder::NewestFirst => {
                "SELECT timestamp, title, description, link, identifier FROM entries ORDER BY id DESC"
            }
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(Entry {
                timestamp: row.get::<_, String>(0)?,
                title: row.get::<_, String>(1)?,
                description: row.get::<_, String>(2)?,
                link: row.get::<_, Option<String>>(3)?,
                identifier: row.get::<_, String>(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            let entry = row?;
            if entry.identifier.is_empty() {
                return Err(StoreError::InvalidRow("empty identifier".into()));
            }
            out.push(entry);
        }
        Ok(out)
    }

    /// Point lookup used on cache miss. A failed lookup reports `false`;
    /// the unique index still blocks a duplicate insert afterwards.
    pub fn exists_by_id(&self, identifier: &str) -> bool {
        let conn = self.conn.lock();
        let res = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM entries WHERE identifier = ?1)",
            params![identifier],
            |row| row.get::<_, bool>(0),
        );
        match res {
            Ok(found) => found,
            Err(e) => {
                store_failure("exists_by_id", &e.into());
                false
            }
        }
    }

    /// Insert the rows of `entries` not already stored, as one transaction.
    /// Returns the rows that actually landed, in input order.
    pub fn insert_batch(&self, entries: &[Entry]) -> Vec<Entry> {
        if entries.is_empty() {
            return Vec::new();
        }
        let mut conn = self.conn.lock();
        match insert_absent(&mut conn, entries) {
            Ok(v) => v,
            Err(e) => {
                store_failure("insert_batch", &e);
                Vec::new()
            }
        }
    }

    /// Keep the `max` most recently inserted rows. Returns rows deleted.
    pub fn trim_to_capacity(&self, max: usize) -> usize {
        let conn = self.conn.lock();
        let res = conn.execute(
            "DELETE FROM entries WHERE id NOT IN (SELECT id FROM entries ORDER BY id DESC LIMIT ?1)",
            params![max as i64],
        );
        match res {
            Ok(n) => {
                if n > 0 {
                    debug!(target: "store", deleted = n, max, "trimmed entry store");
                    counter!("tracker_trimmed_total").increment(n as u64);
                }
                n
            }
            Err(e) => {
                store_failure("trim_to_capacity", &e.into());
                0
            }
        }
    }

    pub fn count(&self) -> usize {
        let conn = self.conn.lock();
        match conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get::<_, i64>(0)) {
            Ok(n) => n.max(0) as usize,
            Err(e) => {
                store_failure("count", &e.into());
                0
            }
        }
    }
}

fn store_failure(op: &'static str, e: &StoreError) {
    error!(target: "store", op, error = %e, "store operation failed; treating as no-op");
    counter!("tracker_store_errors_total").increment(1);
}

/// Identifiers from `ids` already present, queried in chunks.
fn existing_identifiers(conn: &Connection, ids: &[&str]) -> StoreResult<HashSet<String>> {
    let mut found = HashSet::new();
    for chunk in ids.chunks(EXISTS_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("SELECT identifier FROM entries WHERE identifier IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?;
        for row in rows {
            found.insert(row?);
        }
    }
    Ok(found)
}

fn insert_absent(conn: &mut Connection, entries: &[Entry]) -> StoreResult<Vec<Entry>> {
    let ids: Vec<&str> = entries.iter().map(|e| e.identifier.as_str()).collect();
    let existing = existing_identifiers(conn, &ids)?;
    let absent: Vec<&Entry> = entries
        .iter()
        .filter(|e| !existing.contains(&e.identifier))
        .collect();
    if absent.is_empty() {
        return Ok(Vec::new());
    }
    if !existing.is_empty() {
        debug!(target: "store", skipped = existing.len(), "candidates already stored");
    }

    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    match insert_in_tx(conn, &absent, &created_at) {
        Ok(()) => Ok(absent.into_iter().cloned().collect()),
        Err(e) if e.is_unique_violation() => {
            warn!(
                target: "store",
                rows = absent.len(),
                "unique conflict in batch insert; retrying row by row"
            );
            counter!("tracker_commit_conflicts_total").increment(1);
            Ok(insert_each(conn, &absent, &created_at))
        }
        Err(e) => Err(e),
    }
}

fn insert_in_tx(conn: &mut Connection, rows: &[&Entry], created_at: &str) -> StoreResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    {
        let mut stmt = tx.prepare_cached(INSERT_SQL)?;
        for e in rows {
            stmt.execute(params![
                e.timestamp,
                e.title,
                e.description,
                e.link,
                e.identifier,
                created_at
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Conflict path: each row on its own, skipping rows that now violate the
/// unique index. Stops at the first non-conflict error and reports what landed.
fn insert_each(conn: &Connection, rows: &[&Entry], created_at: &str) -> Vec<Entry> {
    let mut inserted = Vec::with_capacity(rows.len());
    for e in rows {
        let res = conn.execute(
            INSERT_SQL,
            params![
                e.timestamp,
                e.title,
                e.description,
                e.link,
                e.identifier,
                created_at
            ],
        );
        match res.map_err(StoreError::from) {
            Ok(_) => inserted.push((*e).clone()),
            Err(err) if err.is_unique_violation() => {
                debug!(target: "store", identifier = %e.identifier, "row already stored; skipped");
            }
            Err(err) => {
                store_failure("insert_each", &err);
                break;
            }
        }
    }
    inserted
}
