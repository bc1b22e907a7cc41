use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// =============================================================================
// Records
// =============================================================================

/// A single clarification record: one recurring question and its answer.
///
/// `variants`, `context_tags` and `sprints_seen` behave as sets: backends do
/// not guarantee their order across a write/read round trip.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Globally unique key, immutable once created.
    pub id: String,
    pub canonical_question: String,
    /// Alternate phrasings of the same question.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
    #[serde(default)]
    pub current_answer: String,
    #[serde(default)]
    pub occurrences: u32,
    #[serde(default)]
    pub first_seen: String,
    #[serde(default)]
    pub last_seen: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sprints_seen: Vec<String>,
    /// Free-form lifecycle label (pending, promoted, stale, ...).
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_tags: Vec<String>,
    #[serde(default)]
    pub confidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_date: Option<String>,
}

impl Entry {
    /// Create a freshly observed entry: one occurrence, `pending`, `medium`
    /// confidence, first and last seen on `date`.
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        let date = date.into();
        Self {
            id: id.into(),
            canonical_question: question.into(),
            current_answer: answer.into(),
            occurrences: 1,
            first_seen: date.clone(),
            last_seen: date,
            status: "pending".to_string(),
            confidence: "medium".to_string(),
            ..Default::default()
        }
    }

    /// Whether the entry carries `tag` in its context tags.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.context_tags.iter().any(|t| t == tag)
    }

    /// Whether the entry was seen in `sprint`.
    pub fn seen_in_sprint(&self, sprint: &str) -> bool {
        self.sprints_seen.iter().any(|s| s == sprint)
    }
}

/// Whole-collection container persisted by the document backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub version: u32,
    pub created: String,
    pub last_updated: String,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

impl Document {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(created: impl Into<String>) -> Self {
        let created = created.into();
        Self {
            version: Self::CURRENT_VERSION,
            last_updated: created.clone(),
            created,
            entries: Vec::new(),
        }
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Predicate and pagination bundle for `list`/`export`.
///
/// All predicates are AND-ed; `tags` matches when the entry carries ANY of
/// the listed tags. Pagination is applied after filtering.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListFilter {
    pub status: Option<String>,
    pub min_occurrences: Option<u32>,
    pub tags: Vec<String>,
    pub sprint: Option<String>,
    /// Free-text query over question and answer.
    pub query: Option<String>,
    pub offset: usize,
    /// Maximum number of results; `None` means unbounded.
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_min_occurrences(mut self, min: u32) -> Self {
        self.min_occurrences = Some(min);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sprint(mut self, sprint: impl Into<String>) -> Self {
        self.sprint = Some(sprint.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The query term, if present and not blank.
    pub fn query_term(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// Evaluate every predicate except pagination against one entry.
    ///
    /// The free-text predicate here is a case-insensitive substring match
    /// over question and answer; the relational backend routes the same
    /// predicate through its full-text index instead.
    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(status) = &self.status {
            if &entry.status != status {
                return false;
            }
        }

        if let Some(min) = self.min_occurrences {
            if entry.occurrences < min {
                return false;
            }
        }

        if !self.tags.is_empty() && !self.tags.iter().any(|t| entry.has_tag(t)) {
            return false;
        }

        if let Some(sprint) = &self.sprint {
            if !entry.seen_in_sprint(sprint) {
                return false;
            }
        }

        if let Some(query) = self.query_term() {
            let query = query.to_lowercase();
            if !entry.canonical_question.to_lowercase().contains(&query)
                && !entry.current_answer.to_lowercase().contains(&query)
            {
                return false;
            }
        }

        true
    }

    /// Slice an already-filtered sequence by `offset` and `limit`.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// How `import` treats ids that already exist in the destination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Add new entries only; existing ids are skipped.
    #[default]
    Append,
    /// Replace the destination collection entirely.
    Overwrite,
    /// Update existing ids in place and create new ones.
    Merge,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::Append => "append",
            ImportMode::Overwrite => "overwrite",
            ImportMode::Merge => "merge",
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(ImportMode::Append),
            "overwrite" => Ok(ImportMode::Overwrite),
            "merge" => Ok(ImportMode::Merge),
            other => Err(StoreError::Config(format!(
                "invalid import mode: {} (use: append, overwrite, merge)",
                other
            ))),
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// One item that a bulk operation could not apply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub id: String,
    pub message: String,
}

/// Aggregated outcome of a multi-record operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    /// Items examined.
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Items left alone: duplicates on insert, unknown ids on update/delete.
    pub skipped: usize,
    pub errors: Vec<BulkFailure>,
}

impl BulkResult {
    pub fn record_failure(&mut self, id: impl Into<String>, message: impl Into<String>) {
        self.errors.push(BulkFailure {
            id: id.into(),
            message: message.into(),
        });
    }

    /// Whether the operation changed stored state at all.
    pub fn is_mutating(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Point-in-time statistics about a store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_entries: usize,
    pub entries_by_status: BTreeMap<String, usize>,
    pub total_variants: usize,
    /// Distinct tags across all entries.
    pub total_tags: usize,
    /// Distinct sprints across all entries.
    pub total_sprints: usize,
    pub storage_size_bytes: u64,
    pub last_modified: Option<String>,
}
