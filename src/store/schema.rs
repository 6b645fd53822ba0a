// src/store/schema.rs
use rusqlite::Connection;

use crate::error::StoreResult;

// `id` is the insertion ordinal; retention trims by it, never by feed timestamp.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT NOT NULL DEFAULT '',
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    link        TEXT,
    identifier  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_identifier
    ON entries(identifier);
CREATE INDEX IF NOT EXISTS idx_entries_created
    ON entries(created_at DESC, identifier);
";

/// Idempotent; safe to run on every start.
pub(super) fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
