//! Log Store
//!
//! Owns the append critical section. Every append on this process goes
//! through one mutex, and the backend's own transaction covers writers in
//! other processes. Prune deletes take the same mutex so a row can never be
//! read as the predecessor and then removed before it is used.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chain::{LogEntry, NewLogEntry};
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{LogFilter, StorageBackend, Window};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// `page >= 1`, `per_page` in `[1, 100]`.
pub fn clamp_page(page: u32, per_page: u32) -> (u32, u32) {
    (page.max(1), per_page.clamp(1, MAX_PAGE_SIZE))
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    pub entries: Vec<LogEntry>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub matched: u64,
    pub deleted: u64,
}

#[derive(Clone)]
pub struct LogStore {
    backend: Arc<dyn StorageBackend>,
    append_lock: Arc<Mutex<()>>,
}

impl LogStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Append with the current time as timestamp.
    pub async fn append(&self, entry: NewLogEntry) -> LedgerResult<LogEntry> {
        self.append_with_timestamp(entry, chrono::Utc::now().timestamp())
            .await
    }

    /// Validate, then chain the entry onto the current head.
    ///
    /// The write runs on its own task so that dropping the caller's future
    /// cannot abandon an append halfway.
    pub async fn append_with_timestamp(
        &self,
        entry: NewLogEntry,
        timestamp: i64,
    ) -> LedgerResult<LogEntry> {
        entry.validate()?;

        let guard = self.append_lock.clone().lock_owned().await;
        let backend = self.backend.clone();
        let task = tokio::spawn(async move {
            let result = backend.append_entry(entry, timestamp).await;
            drop(guard);
            result
        });

        let committed = task.await.map_err(|e| {
            LedgerError::StorageUnavailable(format!("Append task failed: {}", e))
        })??;
        debug!("Committed {}", committed.summary());
        Ok(committed)
    }

    pub async fn query(
        &self,
        filter: &LogFilter,
        page: u32,
        page_size: u32,
    ) -> LedgerResult<QueryPage> {
        let (page, per_page) = clamp_page(page, page_size);
        let total = self.backend.count_entries(filter).await?;
        let entries = self
            .backend
            .select_entries(
                filter,
                Window {
                    limit: Some(per_page),
                    offset: (page - 1).saturating_mul(per_page),
                },
            )
            .await?;

        Ok(QueryPage {
            entries,
            total,
            page,
            per_page,
        })
    }

    pub async fn count(&self, filter: &LogFilter) -> LedgerResult<u64> {
        self.backend.count_entries(filter).await
    }

    pub async fn total(&self) -> LedgerResult<u64> {
        self.count(&LogFilter::default()).await
    }

    /// The `limit` most recent matching entries.
    pub async fn recent(&self, filter: &LogFilter, limit: u32) -> LedgerResult<Vec<LogEntry>> {
        self.backend.select_entries(filter, Window::first(limit)).await
    }

    /// Every matching entry, most recent first.
    pub async fn select_all(&self, filter: &LogFilter) -> LedgerResult<Vec<LogEntry>> {
        self.backend.select_entries(filter, Window::all()).await
    }

    /// Count, and unless `dry_run`, delete entries with `timestamp < cutoff`.
    ///
    /// When the backend reports no affected rows for a non-empty match the
    /// deleted count falls back to the matched count.
    pub async fn delete_older_than(&self, cutoff: i64, dry_run: bool) -> LedgerResult<DeleteOutcome> {
        self.delete_older_than_guarded(cutoff, dry_run, |_, _| Ok(()))
            .await
    }

    /// Like [`LogStore::delete_older_than`], but `guard` sees `(total, matched)`
    /// read under the append lock and may veto the deletion.
    pub async fn delete_older_than_guarded<F>(
        &self,
        cutoff: i64,
        dry_run: bool,
        guard: F,
    ) -> LedgerResult<DeleteOutcome>
    where
        F: FnOnce(u64, u64) -> LedgerResult<()>,
    {
        let _guard = self.append_lock.lock().await;

        let total = self.total().await?;
        let matched = self.backend.count_older_than(cutoff).await?;
        guard(total, matched)?;
        if dry_run || matched == 0 {
            return Ok(DeleteOutcome {
                matched,
                deleted: 0,
            });
        }

        let mut deleted = self.backend.delete_older_than(cutoff).await?;
        if deleted == 0 {
            deleted = matched;
        }
        debug!("Deleted {} of {} entries older than {}", deleted, matched, cutoff);
        Ok(DeleteOutcome { matched, deleted })
    }

    pub async fn last_hash(&self) -> LedgerResult<String> {
        self.backend.last_hash().await
    }
}
