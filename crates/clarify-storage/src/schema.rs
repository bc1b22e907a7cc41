//! Database schema application and integrity checks.
//!
//! Applies the clarification schema (version 1): the `entries` parent
//! table, three child tables for the set-valued fields, and the
//! `entries_fts` full-text index kept in sync by triggers. Safe to run on
//! every open.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use clarify_core::error::{Result, StoreError};

use crate::db::storage_err;

/// Schema version this build writes and expects.
pub const CURRENT_VERSION: i64 = 1;

/// Tables that must exist in an initialized database.
pub const REQUIRED_TABLES: &[&str] = &[
    "entries",
    "entry_variants",
    "entry_tags",
    "entry_sprints",
    "entries_fts",
];

/// Triggers that keep `entries_fts` aligned with `entries`.
pub const REQUIRED_TRIGGERS: &[&str] = &["entries_ai", "entries_ad", "entries_au"];

/// Apply all pending schema versions and return the resulting version.
pub fn initialize(conn: &Connection) -> Result<i64> {
    // Create the migrations tracking table first.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| storage_err("Failed to create migrations table", e))?;

    let version = current_version(conn)?;
    if version >= CURRENT_VERSION {
        debug!(version, "Schema already current");
        return Ok(version);
    }

    apply_v1(conn)?;
    info!("Applied migration v1: clarification_entries");
    Ok(CURRENT_VERSION)
}

/// The applied schema version, or 0 for an uninitialized database.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let has_table: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|e| storage_err("Failed to inspect schema", e))?
        > 0;
    if !has_table {
        return Ok(0);
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| storage_err("Failed to query migration version", e))
}

/// Version 1: entries, normalized set-valued fields, full-text index.
///
/// `row_id` is an explicit INTEGER PRIMARY KEY so VACUUM cannot renumber
/// the rows the external-content FTS index is addressed by.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS entries (
            row_id              INTEGER PRIMARY KEY,
            id                  TEXT NOT NULL UNIQUE,
            canonical_question  TEXT NOT NULL,
            current_answer      TEXT NOT NULL DEFAULT '',
            occurrences         INTEGER NOT NULL DEFAULT 1
                                CHECK (occurrences >= 0),
            first_seen          TEXT NOT NULL DEFAULT '',
            last_seen           TEXT NOT NULL DEFAULT '',
            status              TEXT NOT NULL DEFAULT 'pending',
            confidence          TEXT NOT NULL DEFAULT 'low',
            promoted_to         TEXT,
            promoted_date       TEXT,
            created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS entry_variants (
            entry_id    TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
            variant     TEXT NOT NULL,
            PRIMARY KEY (entry_id, variant)
        );

        CREATE TABLE IF NOT EXISTS entry_tags (
            entry_id    TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
            tag         TEXT NOT NULL,
            PRIMARY KEY (entry_id, tag)
        );

        CREATE TABLE IF NOT EXISTS entry_sprints (
            entry_id    TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
            sprint      TEXT NOT NULL,
            PRIMARY KEY (entry_id, sprint)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_status ON entries (status);
        CREATE INDEX IF NOT EXISTS idx_entries_occurrences ON entries (occurrences);
        CREATE INDEX IF NOT EXISTS idx_entries_last_seen ON entries (last_seen);
        CREATE INDEX IF NOT EXISTS idx_entries_question ON entries (canonical_question);
        CREATE INDEX IF NOT EXISTS idx_entries_updated_at ON entries (updated_at);
        CREATE INDEX IF NOT EXISTS idx_tags_tag ON entry_tags (tag);
        CREATE INDEX IF NOT EXISTS idx_sprints_sprint ON entry_sprints (sprint);

        CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
            id,
            canonical_question,
            current_answer,
            content = 'entries',
            content_rowid = 'row_id'
        );

        CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
            INSERT INTO entries_fts (rowid, id, canonical_question, current_answer)
            VALUES (NEW.row_id, NEW.id, NEW.canonical_question, NEW.current_answer);
        END;

        CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
            INSERT INTO entries_fts (entries_fts, rowid, id, canonical_question, current_answer)
            VALUES ('delete', OLD.row_id, OLD.id, OLD.canonical_question, OLD.current_answer);
        END;

        CREATE TRIGGER IF NOT EXISTS entries_au AFTER UPDATE ON entries BEGIN
            INSERT INTO entries_fts (entries_fts, rowid, id, canonical_question, current_answer)
            VALUES ('delete', OLD.row_id, OLD.id, OLD.canonical_question, OLD.current_answer);
            INSERT INTO entries_fts (rowid, id, canonical_question, current_answer)
            VALUES (NEW.row_id, NEW.id, NEW.canonical_question, NEW.current_answer);
        END;

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'clarification_entries');

        COMMIT;
        ",
    )
    .map_err(|e| {
        // Leave no half-applied schema behind.
        let _ = conn.execute_batch("ROLLBACK;");
        storage_err("Failed to apply migration v1", e)
    })?;

    Ok(())
}

/// Verify the database reports no corruption and every expected table and
/// trigger exists.
pub fn validate(conn: &Connection) -> Result<()> {
    let result: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|e| storage_err("Integrity check failed", e))?;
    if result != "ok" {
        return Err(StoreError::Storage(format!(
            "Integrity check failed: {}",
            result
        )));
    }

    for table in REQUIRED_TABLES {
        require_object(conn, "table", table)?;
    }
    for trigger in REQUIRED_TRIGGERS {
        require_object(conn, "trigger", trigger)?;
    }

    Ok(())
}

fn require_object(conn: &Connection, kind: &str, name: &str) -> Result<()> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = ?1 AND name = ?2",
            rusqlite::params![kind, name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| storage_err("Failed to inspect schema", e))?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::Storage(format!(
            "{} {} does not exist",
            kind, name
        ))),
    }
}
