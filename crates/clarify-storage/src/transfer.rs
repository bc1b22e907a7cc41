//! Moving entries between stores and standalone document files.

use std::path::Path;

use tracing::info;

use clarify_core::context::Context;
use clarify_core::error::Result;
use clarify_core::types::{BulkResult, Document, ImportMode, ListFilter};

use crate::document::{self, today};
use crate::store::EntryStore;

/// Export `filter`'s entries from `source` and import them into
/// `destination` under `mode`. Any backend pair works.
pub fn migrate(
    ctx: &Context,
    source: &dyn EntryStore,
    destination: &dyn EntryStore,
    filter: &ListFilter,
    mode: ImportMode,
) -> Result<BulkResult> {
    let entries = source.export(ctx, filter)?;
    let result = destination.import(ctx, &entries, mode)?;
    info!(
        from = %source.path().display(),
        to = %destination.path().display(),
        %mode,
        exported = entries.len(),
        created = result.created,
        updated = result.updated,
        skipped = result.skipped,
        "Migration finished"
    );
    Ok(result)
}

/// Write every entry of `source` to a standalone document file at `path`.
///
/// The document's `created` date is the earliest `first_seen` among the
/// entries, or today when there are none. Returns the number of entries
/// written.
pub fn export_document(ctx: &Context, source: &dyn EntryStore, path: &Path) -> Result<usize> {
    let entries = source.export(ctx, &ListFilter::default())?;
    let created = entries
        .iter()
        .map(|e| e.first_seen.as_str())
        .filter(|d| !d.is_empty())
        .min()
        .map(str::to_string)
        .unwrap_or_else(today);

    let mut doc = Document::new(created);
    doc.last_updated = today();
    doc.entries = entries;

    ctx.check()?;
    document::write_document(path, &doc)?;
    info!(path = %path.display(), entries = doc.entries.len(), "Document exported");
    Ok(doc.entries.len())
}

/// Read a document file without opening a store on it.
pub fn load_document(path: &Path) -> Result<Document> {
    document::load_document(path)
}
