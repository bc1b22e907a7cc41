//! Full-text search using SQLite FTS5.
//!
//! Provides keyword search over the `entries_fts` virtual table, returning
//! results ranked by BM25 relevance score. Caller text is never passed to
//! FTS5 verbatim: [`match_expression`] quotes every token so punctuation in
//! a question cannot raise a syntax error.

use std::sync::Arc;

use rusqlite::Connection;

use clarify_core::error::{Result, StoreError};

use crate::db::{storage_err, Database};

/// Columns a free-text query searches. The `id` column is indexed but only
/// reachable through an explicit `id:` filter.
const TEXT_COLUMNS: &str = "{canonical_question current_answer}";

/// Build an FTS5 MATCH expression from free text.
///
/// Each whitespace-separated token becomes a quoted prefix phrase restricted
/// to the question and answer columns; tokens are AND-ed. Tokens without any
/// alphanumeric character are dropped. Returns `None` when nothing is left.
pub fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(|token| format!("{}: \"{}\"*", TEXT_COLUMNS, token.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

/// A single full-text search hit.
#[derive(Debug, Clone)]
pub struct FtsHit {
    /// The ID of the matching entry.
    pub id: String,
    pub canonical_question: String,
    /// BM25 relevance score (higher = more relevant).
    pub rank: f64,
}

/// Full-text search engine backed by FTS5.
pub struct FtsSearch {
    db: Arc<Database>,
}

impl FtsSearch {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Search entries by question and answer text.
    ///
    /// Results are ranked by BM25 relevance, best first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        self.db.with_conn(|conn| ranked_hits(conn, query, limit))
    }

    /// Count total matches for a query.
    pub fn count_matches(&self, query: &str) -> Result<u64> {
        self.db.with_conn(|conn| {
            let Some(expr) = match_expression(query) else {
                return Ok(0);
            };
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH ?1",
                    rusqlite::params![expr],
                    |row| row.get(0),
                )
                .map_err(|e| storage_err("FTS5 count failed", e))?;
            Ok(count as u64)
        })
    }

    /// Verify the index agrees with the `entries` table.
    pub fn check_integrity(&self) -> Result<()> {
        self.db.with_conn(check_index)
    }
}

/// Ranked hits for `query` on an open connection, best first.
pub(crate) fn ranked_hits(conn: &Connection, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
    let Some(expr) = match_expression(query) else {
        return Ok(Vec::new());
    };

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.canonical_question, rank
             FROM entries_fts
             JOIN entries e ON e.row_id = entries_fts.rowid
             WHERE entries_fts MATCH ?1
             ORDER BY rank, e.row_id
             LIMIT ?2",
        )
        .map_err(|e| storage_err("FTS5 query prepare failed", e))?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(rusqlite::params![expr, limit], |row| {
            let rank: f64 = row.get(2)?;
            Ok(FtsHit {
                id: row.get(0)?,
                canonical_question: row.get(1)?,
                // FTS5 rank is negative (lower = better), negate for consistency.
                rank: -rank,
            })
        })
        .map_err(|e| storage_err("FTS5 query failed", e))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| storage_err("FTS5 row decode failed", e))
}

/// Run the FTS5 integrity check against the content table.
///
/// With `rank = 1` the check also compares the index against every row of
/// `entries`, so a missed trigger surfaces here as a corruption error.
pub(crate) fn check_index(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT INTO entries_fts (entries_fts, rank) VALUES ('integrity-check', 1)",
        [],
    )
    .map_err(|e| StoreError::Storage(format!("Search index out of sync: {}", e)))?;
    Ok(())
}
