//! Stale-entry retention.
//!
//! An entry is stale once its `last_seen` date falls before a cutoff derived
//! from a [`RetentionWindow`]. Pruning removes every stale entry with one
//! bulk delete, so it runs against either backend.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, Local, NaiveDate};
use tracing::info;

use clarify_core::config::StorageConfig;
use clarify_core::context::Context;
use clarify_core::error::{Result, StoreError};
use clarify_core::types::ListFilter;

use crate::store::EntryStore;

/// Outcome of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneResult {
    /// Entries inspected.
    pub examined: usize,
    /// Entries removed.
    pub pruned: usize,
    /// Stale entries that were already gone when the delete ran.
    pub skipped: usize,
}

/// How long an entry may go unseen before it is considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    days: u64,
}

impl RetentionWindow {
    pub fn days(days: u64) -> Self {
        Self { days }
    }

    /// The window configured by `stale_after_days`.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::days(u64::from(config.stale_after_days))
    }

    pub fn as_days(&self) -> u64 {
        self.days
    }

    /// The first date that is not stale, counted back from `today`.
    pub fn cutoff_from(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(self.days))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Cutoff counted back from the local date, as `YYYY-MM-DD`.
    pub fn cutoff(&self) -> String {
        self.cutoff_from(Local::now().date_naive())
            .format("%Y-%m-%d")
            .to_string()
    }
}

impl FromStr for RetentionWindow {
    type Err = StoreError;

    /// Parse `<n>d`, `<n>w`, `<n>m` (30 days) or `<n>y` (365 days).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        let invalid = || {
            StoreError::Config(format!(
                "invalid retention window '{}': use a format like 30d, 2w, 3m, 1y",
                s
            ))
        };

        let unit = s.chars().last().ok_or_else(invalid)?;
        let digits = &s[..s.len() - unit.len_utf8()];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;

        let per_unit = match unit {
            'd' => 1,
            'w' => 7,
            'm' => 30,
            'y' => 365,
            _ => return Err(invalid()),
        };
        value
            .checked_mul(per_unit)
            .map(Self::days)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.days)
    }
}

/// Remove every entry whose `last_seen` sorts before `cutoff` (`YYYY-MM-DD`).
pub fn prune_stale(ctx: &Context, store: &dyn EntryStore, cutoff: &str) -> Result<PruneResult> {
    let entries = store.list(ctx, &ListFilter::default())?;
    let stale: Vec<String> = entries
        .iter()
        .filter(|e| e.last_seen.as_str() < cutoff)
        .map(|e| e.id.clone())
        .collect();

    let mut result = PruneResult {
        examined: entries.len(),
        ..PruneResult::default()
    };
    if !stale.is_empty() {
        let deleted = store.bulk_delete(ctx, &stale)?;
        result.pruned = deleted.deleted;
        result.skipped = deleted.skipped;
    }

    info!(
        cutoff,
        examined = result.examined,
        pruned = result.pruned,
        skipped = result.skipped,
        "Prune cycle completed"
    );
    Ok(result)
}
