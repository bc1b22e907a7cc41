//! Relational entry store backed by SQLite.
//!
//! Scalar fields live in `entries`; the three set-valued fields live in
//! `entry_variants`, `entry_tags` and `entry_sprints`, keyed by
//! `(entry_id, value)` and removed by cascade. Every multi-row write runs in
//! one transaction. Bulk operations give each item its own savepoint so a
//! failing item is rolled back alone and reported in the result.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, info};

use clarify_core::config::StorageConfig;
use clarify_core::context::Context;
use clarify_core::error::{Result, StoreError};
use clarify_core::types::{BulkResult, Entry, ImportMode, ListFilter, StorageStats};

use crate::db::{storage_err, Database};
use crate::factory::{self, StorageKind};
use crate::schema;
use crate::search::{self, FtsHit, FtsSearch};
use crate::store::{BatchMode, EntryStore};

const ENTRY_COLUMNS: &str = "e.id, e.canonical_question, e.current_answer, e.occurrences,
     e.first_seen, e.last_seen, e.status, e.confidence, e.promoted_to, e.promoted_date";

/// One of the normalized set-valued fields.
#[derive(Clone, Copy, Debug)]
enum ChildSet {
    Variants,
    Tags,
    Sprints,
}

impl ChildSet {
    const ALL: [ChildSet; 3] = [ChildSet::Variants, ChildSet::Tags, ChildSet::Sprints];

    fn table(self) -> &'static str {
        match self {
            ChildSet::Variants => "entry_variants",
            ChildSet::Tags => "entry_tags",
            ChildSet::Sprints => "entry_sprints",
        }
    }

    fn column(self) -> &'static str {
        match self {
            ChildSet::Variants => "variant",
            ChildSet::Tags => "tag",
            ChildSet::Sprints => "sprint",
        }
    }

    fn values(self, entry: &Entry) -> &[String] {
        match self {
            ChildSet::Variants => &entry.variants,
            ChildSet::Tags => &entry.context_tags,
            ChildSet::Sprints => &entry.sprints_seen,
        }
    }

    fn values_mut(self, entry: &mut Entry) -> &mut Vec<String> {
        match self {
            ChildSet::Variants => &mut entry.variants,
            ChildSet::Tags => &mut entry.context_tags,
            ChildSet::Sprints => &mut entry.sprints_seen,
        }
    }
}

/// SQLite-backed [`EntryStore`].
pub struct SqliteStore {
    db: Arc<Database>,
    fts: FtsSearch,
}

impl SqliteStore {
    /// Open (or create) a store at `path` with default tuning.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_config(&StorageConfig::for_path(path))
    }

    /// Open (or create) a store at `config.path`.
    pub fn open_with_config(config: &StorageConfig) -> Result<Self> {
        factory::require_kind(&config.path, StorageKind::Relational)?;
        config.validate()?;

        let db = Database::open(&config.path, config)?;
        Ok(Self::from_database(Arc::new(db)))
    }

    /// A throwaway store that lives only in memory.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_database(Arc::new(Database::in_memory()?)))
    }

    fn from_database(db: Arc<Database>) -> Self {
        let fts = FtsSearch::new(Arc::clone(&db));
        Self { db, fts }
    }

    /// Check engine integrity plus the presence of every table and trigger.
    pub fn validate(&self) -> Result<()> {
        self.db.with_conn(schema::validate)
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.db.with_conn(schema::current_version)
    }

    /// Ranked full-text search over questions and answers.
    pub fn search(&self, ctx: &Context, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        self.db.with_conn(|conn| {
            ctx.check()?;
            search::ranked_hits(conn, query, limit)
        })
    }

    /// Fail unless the full-text index matches the `entries` table exactly.
    pub fn verify_search_index(&self) -> Result<()> {
        self.fts.check_integrity()
    }

    fn write_batch(&self, ctx: &Context, entries: &[Entry], mode: BatchMode) -> Result<BulkResult> {
        let result = self.db.with_tx(|tx| apply_batch(tx, ctx, entries, mode))?;
        info!(
            ?mode,
            processed = result.processed,
            created = result.created,
            updated = result.updated,
            skipped = result.skipped,
            failed = result.errors.len(),
            "Bulk write committed"
        );
        Ok(result)
    }
}

impl EntryStore for SqliteStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Relational
    }

    fn path(&self) -> &Path {
        self.db.path()
    }

    fn create(&self, ctx: &Context, entry: &Entry) -> Result<()> {
        self.db.with_tx(|tx| {
            ctx.check()?;
            if entry_exists(tx, &entry.id)? {
                return Err(StoreError::duplicate(&entry.id));
            }
            insert_entry(tx, entry, &now_timestamp())
        })?;
        debug!(id = %entry.id, "Entry created");
        Ok(())
    }

    fn read(&self, ctx: &Context, id: &str) -> Result<Entry> {
        self.db.with_conn(|conn| {
            ctx.check()?;
            load_entry(conn, id)?.ok_or_else(|| StoreError::not_found(id))
        })
    }

    fn update(&self, ctx: &Context, entry: &Entry) -> Result<()> {
        self.db.with_tx(|tx| {
            ctx.check()?;
            if !entry_exists(tx, &entry.id)? {
                return Err(StoreError::not_found(&entry.id));
            }
            update_entry(tx, entry, &now_timestamp())
        })?;
        debug!(id = %entry.id, "Entry updated");
        Ok(())
    }

    fn delete(&self, ctx: &Context, id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            ctx.check()?;
            if delete_entry(conn, id)? {
                debug!(id, "Entry deleted");
                Ok(())
            } else {
                Err(StoreError::not_found(id))
            }
        })
    }

    fn list(&self, ctx: &Context, filter: &ListFilter) -> Result<Vec<Entry>> {
        self.db.with_conn(|conn| {
            ctx.check()?;
            list_entries(conn, filter)
        })
    }

    fn find_by_question(&self, ctx: &Context, question: &str) -> Result<Entry> {
        self.db.with_conn(|conn| {
            ctx.check()?;
            let sql = format!(
                "SELECT {} FROM entries e WHERE e.canonical_question = ?1
                 ORDER BY e.row_id LIMIT 1",
                ENTRY_COLUMNS
            );
            let found = conn
                .query_row(&sql, rusqlite::params![question], row_to_entry)
                .optional()
                .map_err(|e| storage_err("Failed to find entry by question", e))?;

            match found {
                Some(mut entry) => {
                    hydrate(conn, &mut entry)?;
                    Ok(entry)
                }
                None => Err(StoreError::not_found(question)),
            }
        })
    }

    fn bulk_insert(&self, ctx: &Context, entries: &[Entry]) -> Result<BulkResult> {
        self.write_batch(ctx, entries, BatchMode::Insert)
    }

    fn bulk_update(&self, ctx: &Context, entries: &[Entry]) -> Result<BulkResult> {
        self.write_batch(ctx, entries, BatchMode::Update)
    }

    fn bulk_delete(&self, ctx: &Context, ids: &[String]) -> Result<BulkResult> {
        let result = self.db.with_tx(|tx| {
            let mut result = BulkResult::default();
            for id in ids {
                ctx.check()?;
                result.processed += 1;
                match delete_entry(tx, id) {
                    Ok(true) => result.deleted += 1,
                    Ok(false) => result.skipped += 1,
                    Err(e) => result.record_failure(id, e.to_string()),
                }
            }
            Ok(result)
        })?;
        info!(
            processed = result.processed,
            deleted = result.deleted,
            skipped = result.skipped,
            "Bulk delete committed"
        );
        Ok(result)
    }

    fn import(&self, ctx: &Context, entries: &[Entry], mode: ImportMode) -> Result<BulkResult> {
        let result = self.db.with_tx(|tx| match mode {
            ImportMode::Append => apply_batch(tx, ctx, entries, BatchMode::Insert),
            ImportMode::Merge => apply_batch(tx, ctx, entries, BatchMode::Upsert),
            ImportMode::Overwrite => {
                ctx.check()?;
                let cleared = tx
                    .execute("DELETE FROM entries", [])
                    .map_err(|e| storage_err("Failed to clear entries", e))?;
                debug!(cleared, "Cleared entries for overwrite import");
                // Later duplicates of an id find the first one and are skipped.
                apply_batch(tx, ctx, entries, BatchMode::Insert)
            }
        })?;
        info!(
            %mode,
            processed = result.processed,
            created = result.created,
            updated = result.updated,
            skipped = result.skipped,
            failed = result.errors.len(),
            "Import committed"
        );
        Ok(result)
    }

    fn vacuum(&self, ctx: &Context) -> Result<u64> {
        let reclaimed = self.db.with_conn(|conn| {
            ctx.check()?;
            let before = database_size(conn)?;
            conn.execute_batch("VACUUM;")
                .map_err(|e| storage_err("VACUUM failed", e))?;
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .map_err(|e| storage_err("WAL checkpoint failed", e))?;
            let after = database_size(conn)?;
            Ok(before.saturating_sub(after))
        })?;
        info!(path = %self.db.path().display(), reclaimed, "Database vacuumed");
        Ok(reclaimed)
    }

    fn stats(&self, ctx: &Context) -> Result<StorageStats> {
        self.db.with_conn(|conn| {
            ctx.check()?;
            let count = |sql: &str| -> Result<usize> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as usize)
                    .map_err(|e| storage_err("Stats query failed", e))
            };

            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM entries GROUP BY status")
                .map_err(|e| storage_err("Stats query prepare failed", e))?;
            let entries_by_status: BTreeMap<String, usize> = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })
                .map_err(|e| storage_err("Stats query failed", e))?
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| storage_err("Stats row decode failed", e))?;

            let last_modified: Option<String> = conn
                .query_row("SELECT MAX(updated_at) FROM entries", [], |row| row.get(0))
                .map_err(|e| storage_err("Stats query failed", e))?;

            Ok(StorageStats {
                total_entries: count("SELECT COUNT(*) FROM entries")?,
                entries_by_status,
                total_variants: count("SELECT COUNT(*) FROM entry_variants")?,
                total_tags: count("SELECT COUNT(DISTINCT tag) FROM entry_tags")?,
                total_sprints: count("SELECT COUNT(DISTINCT sprint) FROM entry_sprints")?,
                storage_size_bytes: database_size(conn)?,
                last_modified,
            })
        })
    }

    fn backup(&self, ctx: &Context, dest: &Path) -> Result<()> {
        self.db.with_conn(|conn| {
            let target = dest.to_str().filter(|s| !s.is_empty());
            let Some(target) = target else {
                return Err(StoreError::InvalidPath);
            };
            // The live file is never a backup target.
            if factory::same_file(self.db.path(), dest) {
                return Err(StoreError::InvalidPath);
            }
            ctx.check()?;

            if let Some(parent) = dest.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            // VACUUM INTO refuses to overwrite an existing file.
            if dest.exists() {
                std::fs::remove_file(dest)?;
            }

            conn.execute("VACUUM INTO ?1", rusqlite::params![target])
                .map_err(|e| storage_err("Backup failed", e))?;
            Ok(())
        })?;
        info!(source = %self.db.path().display(), dest = %dest.display(), "Database backed up");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.db.close()
    }

    fn is_closed(&self) -> bool {
        self.db.is_closed()
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.db.path())
            .finish()
    }
}

// =============================================================================
// Row helpers
// =============================================================================

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn database_size(conn: &Connection) -> Result<u64> {
    // page_count * page_size gives approximate DB size.
    let page_count: i64 = conn
        .query_row("PRAGMA page_count", [], |row| row.get(0))
        .map_err(|e| storage_err("Failed to read page count", e))?;
    let page_size: i64 = conn
        .query_row("PRAGMA page_size", [], |row| row.get(0))
        .map_err(|e| storage_err("Failed to read page size", e))?;
    Ok((page_count * page_size).max(0) as u64)
}

fn entry_exists(conn: &Connection, id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM entries WHERE id = ?1",
        rusqlite::params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| storage_err("Failed to check entry existence", e))
}

fn insert_entry(conn: &Connection, entry: &Entry, now: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO entries (id, canonical_question, current_answer, occurrences,
                              first_seen, last_seen, status, confidence,
                              promoted_to, promoted_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        rusqlite::params![
            entry.id,
            entry.canonical_question,
            entry.current_answer,
            entry.occurrences,
            entry.first_seen,
            entry.last_seen,
            entry.status,
            entry.confidence,
            entry.promoted_to,
            entry.promoted_date,
            now,
        ],
    )
    .map_err(|e| storage_err("Failed to insert entry", e))?;

    write_children(conn, entry)
}

fn update_entry(conn: &Connection, entry: &Entry, now: &str) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE entries
             SET canonical_question = ?2, current_answer = ?3, occurrences = ?4,
                 first_seen = ?5, last_seen = ?6, status = ?7, confidence = ?8,
                 promoted_to = ?9, promoted_date = ?10, updated_at = ?11
             WHERE id = ?1",
            rusqlite::params![
                entry.id,
                entry.canonical_question,
                entry.current_answer,
                entry.occurrences,
                entry.first_seen,
                entry.last_seen,
                entry.status,
                entry.confidence,
                entry.promoted_to,
                entry.promoted_date,
                now,
            ],
        )
        .map_err(|e| storage_err("Failed to update entry", e))?;
    if changed == 0 {
        return Err(StoreError::not_found(&entry.id));
    }

    for set in ChildSet::ALL {
        conn.execute(
            &format!("DELETE FROM {} WHERE entry_id = ?1", set.table()),
            rusqlite::params![entry.id],
        )
        .map_err(|e| storage_err("Failed to clear child rows", e))?;
    }
    write_children(conn, entry)
}

/// Returns `false` when no entry had that id.
fn delete_entry(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn
        .execute("DELETE FROM entries WHERE id = ?1", rusqlite::params![id])
        .map_err(|e| storage_err("Failed to delete entry", e))?;
    Ok(deleted > 0)
}

fn write_children(conn: &Connection, entry: &Entry) -> Result<()> {
    for set in ChildSet::ALL {
        let values = set.values(entry);
        if values.is_empty() {
            continue;
        }
        let mut stmt = conn
            .prepare_cached(&format!(
                "INSERT OR IGNORE INTO {} (entry_id, {}) VALUES (?1, ?2)",
                set.table(),
                set.column()
            ))
            .map_err(|e| storage_err("Failed to prepare child insert", e))?;
        for value in values {
            stmt.execute(rusqlite::params![entry.id, value])
                .map_err(|e| storage_err("Failed to insert child row", e))?;
        }
    }
    Ok(())
}

fn load_children(conn: &Connection, set: ChildSet, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM {} WHERE entry_id = ?1 ORDER BY rowid",
            set.column(),
            set.table()
        ))
        .map_err(|e| storage_err("Failed to prepare child query", e))?;
    let values = stmt
        .query_map(rusqlite::params![id], |row| row.get(0))
        .map_err(|e| storage_err("Failed to query child rows", e))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| storage_err("Failed to decode child row", e))?;
    Ok(values)
}

fn hydrate(conn: &Connection, entry: &mut Entry) -> Result<()> {
    for set in ChildSet::ALL {
        *set.values_mut(entry) = load_children(conn, set, &entry.id)?;
    }
    Ok(())
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        canonical_question: row.get(1)?,
        current_answer: row.get(2)?,
        occurrences: row.get(3)?,
        first_seen: row.get(4)?,
        last_seen: row.get(5)?,
        status: row.get(6)?,
        confidence: row.get(7)?,
        promoted_to: row.get(8)?,
        promoted_date: row.get(9)?,
        ..Entry::default()
    })
}

fn load_entry(conn: &Connection, id: &str) -> Result<Option<Entry>> {
    let sql = format!("SELECT {} FROM entries e WHERE e.id = ?1", ENTRY_COLUMNS);
    let found = conn
        .query_row(&sql, rusqlite::params![id], row_to_entry)
        .optional()
        .map_err(|e| storage_err("Failed to read entry", e))?;

    match found {
        Some(mut entry) => {
            hydrate(conn, &mut entry)?;
            Ok(Some(entry))
        }
        None => Ok(None),
    }
}

/// Compose the list query: optional FTS join, scalar predicates, EXISTS
/// subqueries for tags and sprint, then LIMIT/OFFSET.
fn list_entries(conn: &Connection, filter: &ListFilter) -> Result<Vec<Entry>> {
    let mut sql = format!("SELECT {} FROM entries e", ENTRY_COLUMNS);
    let mut clauses: Vec<String> = Vec::new();
    let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

    let fts_expr = filter.query_term().and_then(search::match_expression);
    if let Some(expr) = &fts_expr {
        sql.push_str(" JOIN entries_fts ON entries_fts.rowid = e.row_id");
        clauses.push("entries_fts MATCH ?".to_string());
        params_vec.push(Box::new(expr.clone()));
    } else if filter.query_term().is_some() {
        // Only punctuation: nothing can match.
        return Ok(Vec::new());
    }

    if let Some(status) = &filter.status {
        clauses.push("e.status = ?".to_string());
        params_vec.push(Box::new(status.clone()));
    }
    if let Some(min) = filter.min_occurrences {
        clauses.push("e.occurrences >= ?".to_string());
        params_vec.push(Box::new(min));
    }
    if !filter.tags.is_empty() {
        let placeholders = vec!["?"; filter.tags.len()].join(", ");
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM entry_tags t WHERE t.entry_id = e.id AND t.tag IN ({}))",
            placeholders
        ));
        for tag in &filter.tags {
            params_vec.push(Box::new(tag.clone()));
        }
    }
    if let Some(sprint) = &filter.sprint {
        clauses.push(
            "EXISTS (SELECT 1 FROM entry_sprints s WHERE s.entry_id = e.id AND s.sprint = ?)"
                .to_string(),
        );
        params_vec.push(Box::new(sprint.clone()));
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(if fts_expr.is_some() {
        " ORDER BY rank, e.row_id"
    } else {
        " ORDER BY e.row_id"
    });
    sql.push_str(" LIMIT ? OFFSET ?");
    let limit = filter
        .limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1);
    params_vec.push(Box::new(limit));
    params_vec.push(Box::new(i64::try_from(filter.offset).unwrap_or(i64::MAX)));

    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| storage_err("List query prepare failed", e))?;
    let mut entries = stmt
        .query_map(params_refs.as_slice(), row_to_entry)
        .map_err(|e| storage_err("List query failed", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| storage_err("List row decode failed", e))?;

    for entry in &mut entries {
        hydrate(conn, entry)?;
    }
    Ok(entries)
}

/// Apply one write per entry inside `tx`, each in its own savepoint.
///
/// Existing/missing ids are skipped according to `mode`; a failing item is
/// rolled back to its savepoint and recorded. Context expiry aborts the
/// whole batch.
fn apply_batch(
    tx: &mut Transaction<'_>,
    ctx: &Context,
    entries: &[Entry],
    mode: BatchMode,
) -> Result<BulkResult> {
    let mut result = BulkResult::default();
    let now = now_timestamp();

    for entry in entries {
        ctx.check()?;
        result.processed += 1;

        let exists = entry_exists(tx, &entry.id)?;
        let Some(create) = mode.plan(exists) else {
            result.skipped += 1;
            continue;
        };

        let sp = tx
            .savepoint()
            .map_err(|e| storage_err("Failed to open savepoint", e))?;
        let written = if create {
            insert_entry(&sp, entry, &now)
        } else {
            update_entry(&sp, entry, &now)
        };

        match written {
            Ok(()) => {
                sp.commit()
                    .map_err(|e| storage_err("Failed to release savepoint", e))?;
                if create {
                    result.created += 1;
                } else {
                    result.updated += 1;
                }
            }
            Err(e) => {
                // Dropping the savepoint rolls the item back.
                debug!(id = %entry.id, error = %e, "Bulk item failed");
                result.record_failure(&entry.id, e.to_string());
            }
        }
    }

    Ok(result)
}
