//! Clarify storage crate - persistent clarification entry stores.
//!
//! Two interchangeable backends behind the [`EntryStore`] contract: a
//! whole-collection YAML document and a WAL-mode SQLite database with an
//! FTS5 index. [`open_store`] picks one from the path suffix. Also provides
//! cross-store transfer and stale-entry retention.

pub mod db;
pub mod document;
pub mod factory;
pub mod retention;
pub mod schema;
pub mod search;
pub mod sqlite;
pub mod store;
pub mod transfer;

pub use db::Database;
pub use document::DocumentStore;
pub use factory::{open_existing_store, open_store, open_store_with_config, StorageKind};
pub use retention::{prune_stale, PruneResult, RetentionWindow};
pub use search::{match_expression, FtsHit, FtsSearch};
pub use sqlite::SqliteStore;
pub use store::EntryStore;
pub use transfer::{export_document, load_document, migrate};
