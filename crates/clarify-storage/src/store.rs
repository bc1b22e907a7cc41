//! The entry store contract shared by both backends.

use std::path::Path;

use clarify_core::context::Context;
use clarify_core::error::Result;
use clarify_core::types::{BulkResult, Entry, ImportMode, ListFilter, StorageStats};

use crate::factory::StorageKind;

/// Operations every clarification store backend provides.
///
/// Callers hold a `Box<dyn EntryStore>` from [`crate::open_store`] and never
/// need to know which backend sits behind it. Both implementations raise the
/// same classified [`clarify_core::StoreError`] variants under the same
/// conditions.
///
/// ## Guards
///
/// Every operation on a closed store fails with `StorageClosed` before
/// touching its medium. Operations then check the [`Context`], so an expired
/// or cancelled context never reaches a durable write.
///
/// ## Sync Design
///
/// The trait is synchronous. Each backend serializes access internally (a
/// reader/writer lock or the database connection mutex), so a store can be
/// shared across threads behind an `Arc`.
pub trait EntryStore: Send + Sync {
    // ========================================================================
    // Identity
    // ========================================================================

    fn kind(&self) -> StorageKind;

    /// Location of the backing file.
    fn path(&self) -> &Path;

    // ========================================================================
    // Single-record operations
    // ========================================================================

    /// Persist a new entry. Fails with `DuplicateEntry` if the id exists.
    fn create(&self, ctx: &Context, entry: &Entry) -> Result<()>;

    /// Fetch a fully hydrated copy of one entry.
    fn read(&self, ctx: &Context, id: &str) -> Result<Entry>;

    /// Replace every field of an existing entry.
    fn update(&self, ctx: &Context, entry: &Entry) -> Result<()>;

    /// Remove an entry and everything attached to it.
    fn delete(&self, ctx: &Context, id: &str) -> Result<()>;

    // ========================================================================
    // Queries
    // ========================================================================

    /// Entries matching every predicate of `filter`, then paginated.
    fn list(&self, ctx: &Context, filter: &ListFilter) -> Result<Vec<Entry>>;

    /// Exact match on `canonical_question`.
    fn find_by_question(&self, ctx: &Context, question: &str) -> Result<Entry>;

    /// Entries carrying any of `tags`.
    fn get_by_tags(&self, ctx: &Context, tags: &[String]) -> Result<Vec<Entry>> {
        self.list(ctx, &ListFilter::default().with_tags(tags.iter().cloned()))
    }

    /// Entries seen in `sprint`.
    fn get_by_sprint(&self, ctx: &Context, sprint: &str) -> Result<Vec<Entry>> {
        self.list(ctx, &ListFilter::default().with_sprint(sprint))
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Insert each entry; existing ids are counted as skipped.
    fn bulk_insert(&self, ctx: &Context, entries: &[Entry]) -> Result<BulkResult>;

    /// Update each entry; unknown ids are counted as skipped.
    fn bulk_update(&self, ctx: &Context, entries: &[Entry]) -> Result<BulkResult>;

    /// Delete each id; unknown ids are counted as skipped.
    fn bulk_delete(&self, ctx: &Context, ids: &[String]) -> Result<BulkResult>;

    /// Load `entries` according to `mode`.
    fn import(&self, ctx: &Context, entries: &[Entry], mode: ImportMode) -> Result<BulkResult>;

    /// Same result set as [`EntryStore::list`], intended for transfer
    /// between stores.
    fn export(&self, ctx: &Context, filter: &ListFilter) -> Result<Vec<Entry>> {
        self.list(ctx, filter)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Compact storage and report the bytes reclaimed.
    fn vacuum(&self, ctx: &Context) -> Result<u64>;

    fn stats(&self, ctx: &Context) -> Result<StorageStats>;

    /// Write an independent, immediately openable copy to `dest`.
    fn backup(&self, ctx: &Context, dest: &Path) -> Result<()>;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Release the underlying handle. Idempotent.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// How a bulk write treats existing and missing ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BatchMode {
    /// Create missing ids, skip existing ones.
    Insert,
    /// Update existing ids, skip missing ones.
    Update,
    /// Update existing ids, create missing ones.
    Upsert,
}

impl BatchMode {
    /// Whether an item is written, and if so whether it is created.
    ///
    /// `None` means the item is skipped.
    pub(crate) fn plan(self, exists: bool) -> Option<bool> {
        match (self, exists) {
            (BatchMode::Insert, true) | (BatchMode::Update, false) => None,
            (BatchMode::Insert, false) | (BatchMode::Upsert, false) => Some(true),
            (BatchMode::Update, true) | (BatchMode::Upsert, true) => Some(false),
        }
    }
}
