//! Storage abstraction
//!
//! The core consumes exactly one [`StorageBackend`], selected once at startup.
//! Backends must only expose fully committed rows to readers and must make
//! [`StorageBackend::append_entry`] atomic: the read of the last hash and the
//! insert of the new row happen as one unit.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::alerts::rules::{AlertRule, RuleSpec};
use crate::audit::AuditEntry;
use crate::chain::{LogEntry, NewLogEntry, Severity};
use crate::error::LedgerResult;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// AND-combined constraints over log entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub module: Option<String>,
    pub action: Option<String>,
    pub user: Option<String>,
    pub severity: Option<Severity>,
    pub success: Option<bool>,
    /// Inclusive lower bound on `timestamp`.
    pub from: Option<i64>,
    /// Inclusive upper bound on `timestamp`.
    pub to: Option<i64>,
    /// Case-insensitive substring over every textual field including details.
    pub text: Option<String>,
}

impl LogFilter {
    pub fn since(from: i64) -> Self {
        Self {
            from: Some(from),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(module) = &self.module {
            if &entry.module != module {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if &entry.user != user {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if entry.severity != severity {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            let fields = [
                entry.module.as_str(),
                entry.action.as_str(),
                entry.user.as_str(),
                entry.severity.as_str(),
                entry.ip.as_str(),
                entry.user_agent.as_str(),
                entry.details.as_str(),
            ];
            if !fields.iter().any(|f| f.to_lowercase().contains(&needle)) {
                return false;
            }
        }
        true
    }
}

/// Filters over the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub entry_type: Option<String>,
    pub actor: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    /// Case-insensitive substring over type, actor and details.
    pub text: Option<String>,
}

impl AuditFilter {
    pub fn of_type(entry_type: impl Into<String>) -> Self {
        Self {
            entry_type: Some(entry_type.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(entry_type) = &self.entry_type {
            if &entry.entry_type != entry_type {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            return [&entry.entry_type, &entry.actor, &entry.details]
                .iter()
                .any(|f| f.to_lowercase().contains(&needle));
        }
        true
    }
}

/// Offset pagination. `limit = None` returns every matching row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn first(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: 0,
        }
    }

    /// Apply the window to already ordered rows.
    pub fn apply<T>(self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset as usize);
        match self.limit {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        }
    }
}

/// Categorical dimension for grouped counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Severity,
    Module,
    Action,
    User,
}

impl Dimension {
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Severity => "severity",
            Dimension::Module => "module",
            Dimension::Action => "action",
            Dimension::User => "user",
        }
    }

    pub fn value_of<'a>(&self, entry: &'a LogEntry) -> &'a str {
        match self {
            Dimension::Severity => entry.severity.as_str(),
            Dimension::Module => &entry.module,
            Dimension::Action => &entry.action,
            Dimension::User => &entry.user,
        }
    }
}

/// Persisted scheduled-prune marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionMarker {
    pub last_run: i64,
    pub last_result: Option<String>,
}

/// Storage backend for the ledger.
///
/// Implementations must be thread-safe. Reads must never observe a
/// partially written row.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name reported in responses so the active backend is explicit.
    fn name(&self) -> &'static str;

    /// Atomically read the last hash, chain the new entry onto it and commit.
    async fn append_entry(&self, entry: NewLogEntry, timestamp: i64) -> LedgerResult<LogEntry>;

    /// Hash of the entry with the greatest id, or `""` when empty.
    async fn last_hash(&self) -> LedgerResult<String>;

    /// Matching entries ordered by `timestamp DESC, id DESC`.
    async fn select_entries(&self, filter: &LogFilter, window: Window)
        -> LedgerResult<Vec<LogEntry>>;

    async fn count_entries(&self, filter: &LogFilter) -> LedgerResult<u64>;

    /// Up to `limit` entries with `id > after_id`, ordered by id ascending.
    async fn entries_after(&self, after_id: i64, limit: u32) -> LedgerResult<Vec<LogEntry>>;

    async fn count_older_than(&self, cutoff: i64) -> LedgerResult<u64>;

    /// Delete entries with `timestamp < cutoff`, returning the rows affected
    /// as reported by the backend.
    async fn delete_older_than(&self, cutoff: i64) -> LedgerResult<u64>;

    /// Counts of entries with `timestamp > since`, grouped by `dimension`.
    async fn group_counts(
        &self,
        dimension: Dimension,
        since: i64,
    ) -> LedgerResult<BTreeMap<String, u64>>;

    async fn insert_audit(
        &self,
        entry_type: &str,
        actor: &str,
        details: &str,
        timestamp: i64,
    ) -> LedgerResult<AuditEntry>;

    /// Matching audit entries ordered by `timestamp DESC, id DESC`.
    async fn select_audits(&self, filter: &AuditFilter, window: Window)
        -> LedgerResult<Vec<AuditEntry>>;

    async fn count_audits(&self, filter: &AuditFilter) -> LedgerResult<u64>;

    /// Rules ordered by id ascending.
    async fn list_rules(&self) -> LedgerResult<Vec<AlertRule>>;

    async fn get_rule(&self, id: i64) -> LedgerResult<Option<AlertRule>>;

    async fn insert_rule(&self, spec: &RuleSpec) -> LedgerResult<AlertRule>;

    /// Returns false when no rule has this id.
    async fn update_rule(&self, rule: &AlertRule) -> LedgerResult<bool>;

    /// Returns false when no rule has this id.
    async fn delete_rule(&self, id: i64) -> LedgerResult<bool>;

    async fn retention_marker(&self) -> LedgerResult<RetentionMarker>;

    /// Compare-and-set on the marker: succeeds only when the previous run is
    /// at least `min_interval` seconds before `now`.
    async fn claim_retention_run(&self, now: i64, min_interval: i64) -> LedgerResult<bool>;

    async fn store_retention_result(&self, result: &str) -> LedgerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NewLogEntry;

    fn entry() -> LogEntry {
        NewLogEntry::new("Authentication", "login")
            .user("alice")
            .ip("10.1.1.1")
            .details(r#"{"tenant":"Acme"}"#)
            .into_entry(7, 1_000, String::new())
    }

    #[test]
    fn test_log_filter_equality() {
        let e = entry();
        assert!(LogFilter::default().matches(&e));
        let filter = LogFilter {
            module: Some("Authentication".to_string()),
            success: Some(true),
            ..Default::default()
        };
        assert!(filter.matches(&e));

        let filter = LogFilter {
            user: Some("bob".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&e));
    }

    #[test]
    fn test_log_filter_time_bounds_inclusive() {
        let e = entry();
        assert!(LogFilter::since(1_000).matches(&e));
        assert!(!LogFilter::since(1_001).matches(&e));
        let filter = LogFilter {
            to: Some(1_000),
            ..Default::default()
        };
        assert!(filter.matches(&e));
    }

    #[test]
    fn test_log_filter_text_covers_details() {
        let e = entry();
        let filter = LogFilter {
            text: Some("acme".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&e));
        let filter = LogFilter {
            text: Some("LOGIN".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&e));
        let filter = LogFilter {
            text: Some("nothing".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&e));
    }
}
