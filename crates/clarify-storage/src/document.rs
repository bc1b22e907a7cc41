//! Document entry store: the whole collection in one YAML file.
//!
//! The file is parsed once on open and mirrored in memory behind a
//! reader/writer lock. Every mutation edits a copy of the document, writes
//! the copy to a temporary file next to the target, renames it into place,
//! and only then swaps the copy in as live state. A failed write leaves both
//! memory and disk as they were.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Local;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use clarify_core::context::Context;
use clarify_core::error::{Result, StoreError};
use clarify_core::types::{BulkResult, Document, Entry, ImportMode, ListFilter, StorageStats};

use crate::factory::{self, StorageKind};
use crate::store::{BatchMode, EntryStore};

/// Today's date in the document's `YYYY-MM-DD` format.
pub(crate) fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Read a document file.
///
/// An empty file is treated as a fresh document created today.
pub fn load_document(path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        debug!(path = %path.display(), "Empty document file, starting fresh");
        return Ok(Document::new(today()));
    }
    let doc: Document = serde_yaml::from_str(&content)?;
    Ok(doc)
}

/// Write a document file atomically: serialize, write a sibling temporary
/// file, then rename it over `path`.
pub fn write_document(path: &Path, doc: &Document) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let content = serde_yaml::to_string(doc)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

    debug!(path = %path.display(), entries = doc.entries.len(), "Document written");
    Ok(())
}

struct DocumentState {
    doc: Document,
    closed: bool,
}

/// YAML-file-backed [`EntryStore`].
pub struct DocumentStore {
    path: PathBuf,
    state: RwLock<DocumentState>,
}

impl DocumentStore {
    /// Open the document at `path`, creating it if it does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        factory::require_kind(path, StorageKind::Document)?;

        let doc = if path.exists() {
            load_document(path)?
        } else {
            let doc = Document::new(today());
            write_document(path, &doc)?;
            info!(path = %path.display(), "Created document store");
            doc
        };

        info!(path = %path.display(), entries = doc.entries.len(), "Document store opened");
        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(DocumentState { doc, closed: false }),
        })
    }

    /// Open the document at `path`, failing with `NotFound` if it is absent.
    pub fn open_existing(path: &Path) -> Result<Self> {
        factory::require_kind(path, StorageKind::Document)?;
        if !path.exists() {
            return Err(StoreError::not_found(path.display().to_string()));
        }
        Self::open(path)
    }

    /// A copy of the whole live document.
    pub fn snapshot(&self) -> Result<Document> {
        Ok(self.read_state()?.doc.clone())
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, DocumentState>> {
        let state = self
            .state
            .read()
            .map_err(|e| StoreError::Storage(format!("Failed to acquire read lock: {}", e)))?;
        if state.closed {
            return Err(StoreError::StorageClosed);
        }
        Ok(state)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, DocumentState>> {
        let state = self
            .state
            .write()
            .map_err(|e| StoreError::Storage(format!("Failed to acquire write lock: {}", e)))?;
        if state.closed {
            return Err(StoreError::StorageClosed);
        }
        Ok(state)
    }

    /// Apply `f` to a copy of the document and persist it.
    ///
    /// The write lock is held throughout, so the file and the live state
    /// change together or not at all.
    fn mutate<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&mut Document) -> Result<T>,
    {
        let mut state = self.write_state()?;
        ctx.check()?;

        let mut draft = state.doc.clone();
        let value = f(&mut draft)?;
        draft.last_updated = today();

        ctx.check()?;
        write_document(&self.path, &draft)?;
        state.doc = draft;
        Ok(value)
    }

    fn query<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&Document) -> Result<T>,
    {
        let state = self.read_state()?;
        ctx.check()?;
        f(&state.doc)
    }
}

/// Write each entry into `doc` according to `mode`.
fn apply_batch(
    doc: &mut Document,
    ctx: &Context,
    entries: &[Entry],
    mode: BatchMode,
) -> Result<BulkResult> {
    let mut result = BulkResult::default();

    for entry in entries {
        ctx.check()?;
        result.processed += 1;

        let position = doc.position(&entry.id);
        match (mode.plan(position.is_some()), position) {
            (Some(true), _) => {
                doc.entries.push(entry.clone());
                result.created += 1;
            }
            (Some(false), Some(idx)) => {
                doc.entries[idx] = entry.clone();
                result.updated += 1;
            }
            _ => result.skipped += 1,
        }
    }

    Ok(result)
}

impl EntryStore for DocumentStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Document
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn create(&self, ctx: &Context, entry: &Entry) -> Result<()> {
        self.mutate(ctx, |doc| {
            if doc.position(&entry.id).is_some() {
                return Err(StoreError::duplicate(&entry.id));
            }
            doc.entries.push(entry.clone());
            Ok(())
        })?;
        debug!(id = %entry.id, "Entry created");
        Ok(())
    }

    fn read(&self, ctx: &Context, id: &str) -> Result<Entry> {
        self.query(ctx, |doc| {
            doc.entries
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| StoreError::not_found(id))
        })
    }

    fn update(&self, ctx: &Context, entry: &Entry) -> Result<()> {
        self.mutate(ctx, |doc| {
            let idx = doc
                .position(&entry.id)
                .ok_or_else(|| StoreError::not_found(&entry.id))?;
            doc.entries[idx] = entry.clone();
            Ok(())
        })?;
        debug!(id = %entry.id, "Entry updated");
        Ok(())
    }

    fn delete(&self, ctx: &Context, id: &str) -> Result<()> {
        self.mutate(ctx, |doc| {
            let idx = doc.position(id).ok_or_else(|| StoreError::not_found(id))?;
            // Moves the last entry into the gap.
            doc.entries.swap_remove(idx);
            Ok(())
        })?;
        debug!(id, "Entry deleted");
        Ok(())
    }

    fn list(&self, ctx: &Context, filter: &ListFilter) -> Result<Vec<Entry>> {
        self.query(ctx, |doc| {
            let matched: Vec<Entry> = doc
                .entries
                .iter()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect();
            Ok(filter.paginate(matched))
        })
    }

    fn find_by_question(&self, ctx: &Context, question: &str) -> Result<Entry> {
        self.query(ctx, |doc| {
            doc.entries
                .iter()
                .find(|e| e.canonical_question == question)
                .cloned()
                .ok_or_else(|| StoreError::not_found(question))
        })
    }

    fn bulk_insert(&self, ctx: &Context, entries: &[Entry]) -> Result<BulkResult> {
        let result = self.mutate(ctx, |doc| apply_batch(doc, ctx, entries, BatchMode::Insert))?;
        info!(
            processed = result.processed,
            created = result.created,
            skipped = result.skipped,
            "Bulk insert written"
        );
        Ok(result)
    }

    fn bulk_update(&self, ctx: &Context, entries: &[Entry]) -> Result<BulkResult> {
        let result = self.mutate(ctx, |doc| apply_batch(doc, ctx, entries, BatchMode::Update))?;
        info!(
            processed = result.processed,
            updated = result.updated,
            skipped = result.skipped,
            "Bulk update written"
        );
        Ok(result)
    }

    fn bulk_delete(&self, ctx: &Context, ids: &[String]) -> Result<BulkResult> {
        let result = self.mutate(ctx, |doc| {
            let mut result = BulkResult::default();
            for id in ids {
                ctx.check()?;
                result.processed += 1;
                match doc.position(id) {
                    Some(idx) => {
                        doc.entries.swap_remove(idx);
                        result.deleted += 1;
                    }
                    None => result.skipped += 1,
                }
            }
            Ok(result)
        })?;
        info!(
            processed = result.processed,
            deleted = result.deleted,
            skipped = result.skipped,
            "Bulk delete written"
        );
        Ok(result)
    }

    fn import(&self, ctx: &Context, entries: &[Entry], mode: ImportMode) -> Result<BulkResult> {
        let result = self.mutate(ctx, |doc| match mode {
            ImportMode::Append => apply_batch(doc, ctx, entries, BatchMode::Insert),
            ImportMode::Merge => apply_batch(doc, ctx, entries, BatchMode::Upsert),
            ImportMode::Overwrite => {
                doc.entries.clear();
                apply_batch(doc, ctx, entries, BatchMode::Insert)
            }
        })?;
        info!(
            %mode,
            processed = result.processed,
            created = result.created,
            updated = result.updated,
            skipped = result.skipped,
            "Import written"
        );
        Ok(result)
    }

    fn vacuum(&self, ctx: &Context) -> Result<u64> {
        self.query(ctx, |_| {
            let size = std::fs::metadata(&self.path)?.len();
            debug!(path = %self.path.display(), size, "Document store has nothing to compact");
            Ok(size)
        })
    }

    fn stats(&self, ctx: &Context) -> Result<StorageStats> {
        self.query(ctx, |doc| {
            let mut entries_by_status: BTreeMap<String, usize> = BTreeMap::new();
            let mut tags = BTreeSet::new();
            let mut sprints = BTreeSet::new();
            let mut total_variants = 0;

            for entry in &doc.entries {
                *entries_by_status.entry(entry.status.clone()).or_default() += 1;
                total_variants += entry.variants.len();
                tags.extend(entry.context_tags.iter());
                sprints.extend(entry.sprints_seen.iter());
            }

            let last_modified = Some(doc.last_updated.clone()).filter(|d| !d.is_empty());

            Ok(StorageStats {
                total_entries: doc.entries.len(),
                entries_by_status,
                total_variants,
                total_tags: tags.len(),
                total_sprints: sprints.len(),
                storage_size_bytes: std::fs::metadata(&self.path)?.len(),
                last_modified,
            })
        })
    }

    fn backup(&self, ctx: &Context, dest: &Path) -> Result<()> {
        self.query(ctx, |_| {
            if dest.as_os_str().is_empty() || factory::same_file(&self.path, dest) {
                return Err(StoreError::InvalidPath);
            }
            if let Some(parent) = dest.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::copy(&self.path, dest)?;
            Ok(())
        })?;
        info!(source = %self.path.display(), dest = %dest.display(), "Document store backed up");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StoreError::Storage(format!("Failed to acquire write lock: {}", e)))?;
        if !state.closed {
            // Every mutation is already on disk.
            state.closed = true;
            info!(path = %self.path.display(), "Document store closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.read().map(|s| s.closed).unwrap_or(true)
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::background()
    }

    fn entry(id: &str) -> Entry {
        Entry::new(id, format!("question {}", id), "answer", "2025-01-01")
    }

    fn open_temp() -> (tempfile::TempDir, DocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(&dir.path().join("clarifications.yaml")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("c.yaml");
        let store = DocumentStore::open(&path).unwrap();
        assert!(path.exists());

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.version, Document::CURRENT_VERSION);
        assert!(doc.entries.is_empty());
        assert_eq!(store.snapshot().unwrap(), doc);
    }

    #[test]
    fn test_open_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yml");
        std::fs::write(&path, "").unwrap();

        let store = DocumentStore::open(&path).unwrap();
        store.create(&ctx(), &entry("a")).unwrap();
        assert_eq!(load_document(&path).unwrap().entries.len(), 1);
    }

    #[test]
    fn test_open_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        std::fs::write(&path, "entries: [unclosed").unwrap();
        assert!(matches!(
            DocumentStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_mutations_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        {
            let store = DocumentStore::open(&path).unwrap();
            store.create(&ctx(), &entry("a")).unwrap();
            store.create(&ctx(), &entry("b")).unwrap();
            let mut changed = entry("a");
            changed.current_answer = "changed".into();
            store.update(&ctx(), &changed).unwrap();
            store.close().unwrap();
        }

        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(store.read(&ctx(), "a").unwrap().current_answer, "changed");
        assert_eq!(store.read(&ctx(), "b").unwrap(), entry("b"));
    }

    #[test]
    fn test_file_format_keys() {
        let (_dir, store) = open_temp();
        store.create(&ctx(), &entry("a")).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&raw).unwrap();
        for key in ["version", "created", "last_updated", "entries"] {
            assert!(value.get(key).is_some(), "missing key {}", key);
        }
        let first = &value["entries"][0];
        assert_eq!(first["id"].as_str(), Some("a"));
        assert!(first.get("current_answer").is_some());
        assert!(first.get("variants").is_none());
        assert!(first.get("promoted_to").is_none());
    }

    #[test]
    fn test_duplicate_and_missing() {
        let (_dir, store) = open_temp();
        store.create(&ctx(), &entry("a")).unwrap();

        let mut dup = entry("a");
        dup.current_answer = "other".into();
        assert!(store.create(&ctx(), &dup).unwrap_err().is_duplicate());
        assert_eq!(store.read(&ctx(), "a").unwrap(), entry("a"));

        assert!(store.read(&ctx(), "x").unwrap_err().is_not_found());
        assert!(store.update(&ctx(), &entry("x")).unwrap_err().is_not_found());
        assert!(store.delete(&ctx(), "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_read_returns_copy() {
        let (_dir, store) = open_temp();
        store.create(&ctx(), &entry("a")).unwrap();

        let mut copy = store.read(&ctx(), "a").unwrap();
        copy.current_answer = "mutated".into();
        assert_eq!(store.read(&ctx(), "a").unwrap().current_answer, "answer");
    }

    #[test]
    fn test_delete_moves_last_entry_into_gap() {
        let (_dir, store) = open_temp();
        for id in ["a", "b", "c", "d"] {
            store.create(&ctx(), &entry(id)).unwrap();
        }
        store.delete(&ctx(), "a").unwrap();

        let ids: Vec<String> = store
            .list(&ctx(), &ListFilter::default())
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["d", "b", "c"]);
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let (_dir, store) = open_temp();
        store.create(&ctx(), &entry("a")).unwrap();

        // A directory at the target path makes the rename fail.
        std::fs::remove_file(store.path()).unwrap();
        std::fs::create_dir(store.path()).unwrap();

        assert!(store.create(&ctx(), &entry("b")).is_err());
        assert!(store.read(&ctx(), "b").unwrap_err().is_not_found());
        assert_eq!(store.list(&ctx(), &ListFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_expired_context_blocks_write() {
        let (_dir, store) = open_temp();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let cancelled = Context::background();
        cancelled.cancel();
        assert!(matches!(
            store.bulk_insert(&cancelled, &[entry("a")]),
            Err(StoreError::Cancelled)
        ));

        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
        assert!(store.list(&ctx(), &ListFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_stats_and_vacuum() {
        let (_dir, store) = open_temp();
        let mut a = entry("a");
        a.variants = vec!["v1".into(), "v2".into()];
        a.context_tags = vec!["db".into()];
        a.sprints_seen = vec!["s1".into()];
        let mut b = entry("b");
        b.status = "done".into();
        b.context_tags = vec!["db".into(), "ui".into()];
        store.bulk_insert(&ctx(), &[a, b]).unwrap();

        let stats = store.stats(&ctx()).unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.entries_by_status.get("pending"), Some(&1));
        assert_eq!(stats.total_variants, 2);
        assert_eq!(stats.total_tags, 2);
        assert_eq!(stats.total_sprints, 1);
        assert_eq!(stats.last_modified, Some(today()));

        let size = std::fs::metadata(store.path()).unwrap().len();
        assert_eq!(stats.storage_size_bytes, size);
        assert_eq!(store.vacuum(&ctx()).unwrap(), size);
    }

    #[test]
    fn test_backup_copy_is_independent() {
        let (dir, store) = open_temp();
        store.create(&ctx(), &entry("a")).unwrap();

        let dest = dir.path().join("backup").join("copy.yaml");
        store.backup(&ctx(), &dest).unwrap();
        store.create(&ctx(), &entry("b")).unwrap();

        let copy = DocumentStore::open(&dest).unwrap();
        assert_eq!(copy.list(&ctx(), &ListFilter::default()).unwrap().len(), 1);
        assert!(matches!(
            store.backup(&ctx(), Path::new("")),
            Err(StoreError::InvalidPath)
        ));
    }

    #[test]
    fn test_open_existing_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.yaml");
        assert!(DocumentStore::open_existing(&path).unwrap_err().is_not_found());
        assert!(!path.exists());
    }

    #[test]
    fn test_close() {
        let (_dir, store) = open_temp();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(store.read(&ctx(), "a").unwrap_err().is_closed());
        assert!(store.stats(&ctx()).unwrap_err().is_closed());
        assert!(store.snapshot().unwrap_err().is_closed());
    }
}
