use thiserror::Error;

/// Error type shared by every entry store backend.
///
/// The first seven variants form the classified taxonomy that callers match
/// on; both backends raise them under the same conditions. The remaining
/// variants wrap infrastructure failures (engine, filesystem, encoding) and
/// the caller-supplied cancellation context.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("clarification entry '{key}' not found")]
    NotFound { key: String },

    #[error("clarification with ID '{id}' already exists")]
    DuplicateEntry { id: String },

    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("extension '{extension}' is not supported (use .yaml, .yml, .db, .sqlite, .sqlite3)")]
    UnsupportedBackend { extension: String },

    #[error("invalid path")]
    InvalidPath,

    #[error("storage is closed")]
    StorageClosed,

    #[error("concurrent modification detected for entry '{id}'")]
    ConcurrentModification { id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        StoreError::NotFound { key: key.into() }
    }

    pub fn duplicate(id: impl Into<String>) -> Self {
        StoreError::DuplicateEntry { id: id.into() }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        StoreError::ConstraintViolation {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::DuplicateEntry { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StoreError::StorageClosed)
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(err: toml::ser::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for entry store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
