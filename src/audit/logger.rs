//! Audit Trail
//!
//! Append-only record of deletes, prunes and verifications, with the same
//! filter and pagination shape as log queries.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::audit::entry::AuditEntry;
use crate::error::LedgerResult;
use crate::storage::{AuditFilter, StorageBackend, Window};
use crate::store::clamp_page;

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Clone)]
pub struct AuditTrail {
    backend: Arc<dyn StorageBackend>,
}

impl AuditTrail {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Append one entry with a server-assigned id and timestamp.
    pub async fn record(
        &self,
        entry_type: &str,
        actor: &str,
        details: &str,
    ) -> LedgerResult<AuditEntry> {
        let now = chrono::Utc::now().timestamp();
        let entry = self
            .backend
            .insert_audit(entry_type, actor, details, now)
            .await?;
        debug!("Recorded audit entry: {}", entry.summary());
        Ok(entry)
    }

    /// Record with details serialized from any JSON-serializable value.
    pub async fn record_json<T: Serialize>(
        &self,
        entry_type: &str,
        actor: &str,
        details: &T,
    ) -> LedgerResult<AuditEntry> {
        let details = serde_json::to_string(details)?;
        self.record(entry_type, actor, &details).await
    }

    pub async fn query(
        &self,
        filter: &AuditFilter,
        page: u32,
        per_page: u32,
    ) -> LedgerResult<AuditPage> {
        let (page, per_page) = clamp_page(page, per_page);
        let total = self.backend.count_audits(filter).await?;
        let entries = self
            .backend
            .select_audits(
                filter,
                Window {
                    limit: Some(per_page),
                    offset: (page - 1).saturating_mul(per_page),
                },
            )
            .await?;

        Ok(AuditPage {
            entries,
            total,
            page,
            per_page,
        })
    }

    pub async fn count(&self, filter: &AuditFilter) -> LedgerResult<u64> {
        self.backend.count_audits(filter).await
    }
}
