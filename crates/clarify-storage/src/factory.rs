//! Backend selection by file suffix.
//!
//! `.yaml`/`.yml` open the document backend; `.db`/`.sqlite`/`.sqlite3`
//! open the relational backend. Matching is case-insensitive.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use clarify_core::config::StorageConfig;
use clarify_core::error::{Result, StoreError};

use crate::document::DocumentStore;
use crate::sqlite::SqliteStore;
use crate::store::EntryStore;

/// The two interchangeable backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Whole-collection YAML file.
    Document,
    /// SQLite database with a full-text index.
    Relational,
}

impl StorageKind {
    /// Suffixes (without the dot) that select this backend.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            StorageKind::Document => &["yaml", "yml"],
            StorageKind::Relational => &["db", "sqlite", "sqlite3"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Document => "yaml",
            StorageKind::Relational => "sqlite",
        }
    }

    /// Determine the backend for `path` from its suffix.
    pub fn detect(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidPath);
        }

        let ext = extension_of(path);
        let bare = ext.trim_start_matches('.');
        [StorageKind::Document, StorageKind::Relational]
            .into_iter()
            .find(|kind| kind.extensions().contains(&bare))
            .ok_or(StoreError::UnsupportedBackend { extension: ext })
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased suffix of the file name from its last dot, or an empty
/// string. Dotfiles such as `.yaml` count as suffix-only names.
fn extension_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| name.rfind('.').map(|dot| name[dot..].to_lowercase()))
        .unwrap_or_default()
}

/// Whether `a` and `b` name the same file once resolved. A path that does
/// not exist yet is resolved through its parent directory.
pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    fn resolve(path: &Path) -> Option<PathBuf> {
        if let Ok(full) = path.canonicalize() {
            return Some(full);
        }
        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.canonicalize().ok()?,
            _ => std::env::current_dir().ok()?,
        };
        Some(parent.join(path.file_name()?))
    }

    match (resolve(a), resolve(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

/// Fail unless `path` selects `kind`.
pub(crate) fn require_kind(path: &Path, kind: StorageKind) -> Result<()> {
    if StorageKind::detect(path)? == kind {
        Ok(())
    } else {
        Err(StoreError::UnsupportedBackend {
            extension: extension_of(path),
        })
    }
}

/// Open (or create) the store at `path` with default settings.
pub fn open_store(path: &Path) -> Result<Box<dyn EntryStore>> {
    open_store_with_config(&StorageConfig::for_path(path))
}

/// Open (or create) the store at `config.path`.
pub fn open_store_with_config(config: &StorageConfig) -> Result<Box<dyn EntryStore>> {
    let kind = StorageKind::detect(&config.path)?;
    config.validate()?;
    debug!(path = %config.path.display(), %kind, "Opening entry store");

    match kind {
        StorageKind::Document => Ok(Box::new(DocumentStore::open(&config.path)?)),
        StorageKind::Relational => Ok(Box::new(SqliteStore::open_with_config(config)?)),
    }
}

/// Like [`open_store`], but a document path must already exist.
///
/// Relational stores are still created on demand.
pub fn open_existing_store(path: &Path) -> Result<Box<dyn EntryStore>> {
    match StorageKind::detect(path)? {
        StorageKind::Document => Ok(Box::new(DocumentStore::open_existing(path)?)),
        StorageKind::Relational => open_store(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarify_core::context::Context;

    #[test]
    fn test_detect_suffixes() {
        let cases = [
            ("data.yaml", StorageKind::Document),
            ("data.yml", StorageKind::Document),
            ("DATA.YAML", StorageKind::Document),
            ("dir/data.db", StorageKind::Relational),
            ("data.sqlite", StorageKind::Relational),
            ("data.SQLite3", StorageKind::Relational),
            (".yaml", StorageKind::Document),
            ("dir/.db", StorageKind::Relational),
            (".SQLITE3", StorageKind::Relational),
            ("archive.tar.yml", StorageKind::Document),
        ];
        for (path, expected) in cases {
            assert_eq!(StorageKind::detect(Path::new(path)).unwrap(), expected, "{}", path);
        }
    }

    #[test]
    fn test_detect_rejects_unknown_suffix() {
        match StorageKind::detect(Path::new("data.json")) {
            Err(StoreError::UnsupportedBackend { extension }) => assert_eq!(extension, ".json"),
            other => panic!("unexpected: {:?}", other),
        }
        match StorageKind::detect(Path::new("Makefile")) {
            Err(StoreError::UnsupportedBackend { extension }) => assert_eq!(extension, ""),
            other => panic!("unexpected: {:?}", other),
        }
        // Only the file name's suffix counts.
        match StorageKind::detect(Path::new("v1.db/data")) {
            Err(StoreError::UnsupportedBackend { extension }) => assert_eq!(extension, ""),
            other => panic!("unexpected: {:?}", other),
        }
        match StorageKind::detect(Path::new("data.")) {
            Err(StoreError::UnsupportedBackend { extension }) => assert_eq!(extension, "."),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_detect_empty_path() {
        assert!(matches!(
            StorageKind::detect(Path::new("")),
            Err(StoreError::InvalidPath)
        ));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(StorageKind::Document.to_string(), "yaml");
        assert_eq!(StorageKind::Relational.to_string(), "sqlite");
    }

    #[test]
    fn test_open_store_picks_backend() {
        let dir = tempfile::tempdir().unwrap();

        let doc = open_store(&dir.path().join("c.yml")).unwrap();
        assert_eq!(doc.kind(), StorageKind::Document);

        let rel = open_store(&dir.path().join("c.sqlite3")).unwrap();
        assert_eq!(rel.kind(), StorageKind::Relational);
        assert!(rel.list(&Context::background(), &Default::default()).unwrap().is_empty());
    }

    #[test]
    fn test_open_store_with_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::for_path(dir.path().join("c.db"));
        config.synchronous = "sometimes".into();
        assert!(matches!(
            open_store_with_config(&config),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_open_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(open_existing_store(&missing), Err(e) if e.is_not_found()));
        assert!(!missing.exists());

        let db = open_existing_store(&dir.path().join("new.db")).unwrap();
        assert_eq!(db.kind(), StorageKind::Relational);
    }

    #[test]
    fn test_open_dotfile_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join(".yaml")).unwrap();
        assert_eq!(store.kind(), StorageKind::Document);
        let store = open_store(&dir.path().join(".db")).unwrap();
        assert_eq!(store.kind(), StorageKind::Relational);
    }

    #[test]
    fn test_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.db");
        std::fs::write(&existing, b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let aliased = dir.path().join("sub").join("..").join("a.db");
        assert!(same_file(&existing, &aliased));
        assert!(same_file(&existing, &existing));
        assert!(!same_file(&existing, &dir.path().join("b.db")));

        let missing = dir.path().join("sub").join("new.db");
        let missing_alias = dir.path().join("sub").join(".").join("new.db");
        assert!(same_file(&missing, &missing_alias));
    }

    #[test]
    fn test_direct_open_checks_suffix() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SqliteStore::open(&dir.path().join("c.yaml")),
            Err(StoreError::UnsupportedBackend { .. })
        ));
        assert!(matches!(
            DocumentStore::open(&dir.path().join("c.db")),
            Err(StoreError::UnsupportedBackend { .. })
        ));
    }
}
