//! Retention Pruner
//!
//! Deletes entries older than a cutoff once every guard has passed and
//! records each real run in the audit trail. The scheduled variant is not a
//! timer: callers poll it, and a persisted marker decides whether a run is
//! due.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditTrail, LOGS_PRUNE, LOGS_PRUNE_SCHEDULED};
use crate::error::{LedgerError, LedgerResult};
use crate::retention::policy::{Protections, SECONDS_PER_DAY};
use crate::store::LogStore;

pub const SCHEDULED_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneRequest {
    pub cutoff: i64,
    pub older_than_days: Option<u32>,
    pub dry_run: bool,
    pub protections: Protections,
}

impl PruneRequest {
    pub fn before(cutoff: i64) -> Self {
        Self {
            cutoff,
            older_than_days: None,
            dry_run: false,
            protections: Protections::default(),
        }
    }

    pub fn older_than_days(days: i64, now: i64) -> LedgerResult<Self> {
        let days = u32::try_from(days)
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| LedgerError::Validation("older_than_days must be > 0".to_string()))?;
        Ok(Self {
            cutoff: now - i64::from(days) * SECONDS_PER_DAY,
            older_than_days: Some(days),
            dry_run: false,
            protections: Protections::default(),
        })
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn max_days(mut self, max_days: u32) -> Self {
        self.protections.max_days = Some(max_days);
        self
    }

    pub fn min_remaining(mut self, min_remaining: u64) -> Self {
        self.protections.min_remaining = Some(min_remaining);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneResult {
    pub matched: u64,
    pub deleted: u64,
    pub cutoff: i64,
    pub dry_run: bool,
    pub older_than_days: Option<u32>,
    pub protections: Protections,
}

/// Timer-driven pruning: `days` of retention, at most once per
/// `frequency_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSchedule {
    pub days: u32,
    pub frequency_seconds: i64,
}

impl RetentionSchedule {
    /// `None` when either value disables scheduling.
    pub fn new(days: u32, frequency_seconds: i64) -> Option<Self> {
        (days > 0 && frequency_seconds > 0).then_some(Self {
            days,
            frequency_seconds,
        })
    }
}

#[derive(Clone)]
pub struct RetentionPruner {
    store: LogStore,
    audit: AuditTrail,
    defaults: Protections,
    schedule: Option<RetentionSchedule>,
}

impl RetentionPruner {
    pub fn new(store: LogStore, audit: AuditTrail) -> Self {
        Self {
            store,
            audit,
            defaults: Protections::default(),
            schedule: None,
        }
    }

    /// Guards applied when a request leaves them unset.
    pub fn with_defaults(mut self, defaults: Protections) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_schedule(mut self, schedule: Option<RetentionSchedule>) -> Self {
        self.schedule = schedule;
        self
    }

    pub async fn prune(&self, request: PruneRequest, actor: &str) -> LedgerResult<PruneResult> {
        let now = chrono::Utc::now().timestamp();
        self.execute(request, actor, LOGS_PRUNE, now).await
    }

    /// Run the scheduled prune if the marker says one is due. Returns
    /// `Ok(None)` when scheduling is disabled or another caller already
    /// claimed this interval.
    pub async fn run_scheduled(&self) -> LedgerResult<Option<PruneResult>> {
        self.run_scheduled_at(chrono::Utc::now().timestamp()).await
    }

    pub async fn run_scheduled_at(&self, now: i64) -> LedgerResult<Option<PruneResult>> {
        let schedule = match self.schedule {
            Some(schedule) => schedule,
            None => return Ok(None),
        };

        let backend = self.store.backend();
        if !backend
            .claim_retention_run(now, schedule.frequency_seconds)
            .await?
        {
            return Ok(None);
        }

        let request = PruneRequest::older_than_days(i64::from(schedule.days), now)?;
        let outcome = self
            .execute(request, SCHEDULED_ACTOR, LOGS_PRUNE_SCHEDULED, now)
            .await;

        let marker = match &outcome {
            Ok(result) => serde_json::to_string(result)?,
            Err(e) => format!("error: {}", e),
        };
        backend.store_retention_result(&marker).await?;

        outcome.map(Some)
    }

    async fn execute(
        &self,
        request: PruneRequest,
        actor: &str,
        audit_type: &str,
        now: i64,
    ) -> LedgerResult<PruneResult> {
        let protections = request.protections.or(self.defaults);
        match request.older_than_days {
            Some(days) => protections.check_days(days)?,
            None => protections.check_window(request.cutoff, now)?,
        }

        let outcome = self
            .store
            .delete_older_than_guarded(request.cutoff, request.dry_run, |total, matched| {
                protections.check_remaining(total, matched)
            })
            .await?;

        let result = PruneResult {
            matched: outcome.matched,
            deleted: outcome.deleted,
            cutoff: request.cutoff,
            dry_run: request.dry_run,
            older_than_days: request.older_than_days,
            protections,
        };

        if request.dry_run {
            info!(
                "Prune dry run: {} entries older than {} would be deleted",
                result.matched, result.cutoff
            );
            return Ok(result);
        }

        if let Err(e) = self.audit.record_json(audit_type, actor, &result).await {
            warn!("Pruned {} entries but failed to record audit entry: {}", result.deleted, e);
            return Err(e);
        }
        info!(
            "Pruned {} entries older than {} (actor: {})",
            result.deleted, result.cutoff, actor
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NewLogEntry;
    use crate::storage::{AuditFilter, MemoryBackend, StorageBackend};
    use std::sync::Arc;

    async fn seeded(timestamps: &[i64]) -> (RetentionPruner, AuditTrail, LogStore) {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let store = LogStore::new(backend.clone());
        let audit = AuditTrail::new(backend);
        for ts in timestamps {
            store
                .append_with_timestamp(NewLogEntry::new("Auth", "login"), *ts)
                .await
                .unwrap();
        }
        (RetentionPruner::new(store.clone(), audit.clone()), audit, store)
    }

    #[test]
    fn test_request_from_days() {
        let request = PruneRequest::older_than_days(2, 1_000_000).unwrap();
        assert_eq!(request.cutoff, 1_000_000 - 2 * SECONDS_PER_DAY);
        assert_eq!(request.older_than_days, Some(2));
        assert!(PruneRequest::older_than_days(0, 1_000_000).is_err());
        assert!(PruneRequest::older_than_days(-3, 1_000_000).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_then_real() {
        let (pruner, audit, store) = seeded(&[100, 200, 300]).await;

        let dry = pruner
            .prune(PruneRequest::before(250).dry_run(true), "ops")
            .await
            .unwrap();
        assert_eq!((dry.matched, dry.deleted), (2, 0));
        assert_eq!(store.total().await.unwrap(), 3);
        assert_eq!(audit.count(&AuditFilter::default()).await.unwrap(), 0);

        let real = pruner.prune(PruneRequest::before(250), "ops").await.unwrap();
        assert_eq!((real.matched, real.deleted), (2, 2));
        assert_eq!(store.total().await.unwrap(), 1);

        let page = audit
            .query(&AuditFilter::of_type(LOGS_PRUNE), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].actor, "ops");
        assert_eq!(page.entries[0].details_value()["deleted"], 2);
    }

    #[tokio::test]
    async fn test_min_remaining_blocks_deletion() {
        let (pruner, audit, store) = seeded(&[100, 200, 300]).await;
        let err = pruner
            .prune(PruneRequest::before(250).min_remaining(2), "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PolicyViolation(_)));
        assert_eq!(store.total().await.unwrap(), 3);
        assert_eq!(audit.count(&AuditFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_max_days_uses_defaults() {
        let (pruner, _, store) = seeded(&[100]).await;
        let pruner = pruner.with_defaults(Protections::from_limits(30, 0));
        let now = chrono::Utc::now().timestamp();

        let request = PruneRequest::older_than_days(31, now).unwrap();
        let err = pruner.prune(request, "ops").await.unwrap_err();
        assert!(matches!(err, LedgerError::PolicyViolation(_)));
        assert_eq!(store.total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_max_days_compares_requested_days() {
        let (pruner, _, _) = seeded(&[100]).await;
        let pruner = pruner.with_defaults(Protections::from_limits(30, 0));
        let issued_at = chrono::Utc::now().timestamp() - 1;

        let request = PruneRequest::older_than_days(30, issued_at)
            .unwrap()
            .dry_run(true);
        let result = pruner.prune(request, "ops").await.unwrap();
        assert_eq!(result.older_than_days, Some(30));
        assert_eq!(result.protections.max_days, Some(30));
    }

    #[tokio::test]
    async fn test_scheduled_runs_once_per_interval() {
        let now = 100 * SECONDS_PER_DAY;
        let (pruner, audit, store) = seeded(&[now - 10 * SECONDS_PER_DAY, now - 60]).await;
        let pruner = pruner.with_schedule(RetentionSchedule::new(7, 3_600));

        let first = pruner.run_scheduled_at(now).await.unwrap().unwrap();
        assert_eq!(first.deleted, 1);
        assert!(pruner.run_scheduled_at(now + 60).await.unwrap().is_none());
        assert_eq!(store.total().await.unwrap(), 1);

        let scheduled = audit
            .query(&AuditFilter::of_type(LOGS_PRUNE_SCHEDULED), 1, 10)
            .await
            .unwrap();
        assert_eq!(scheduled.total, 1);
        assert_eq!(scheduled.entries[0].actor, SCHEDULED_ACTOR);

        let marker = store.backend().retention_marker().await.unwrap();
        assert_eq!(marker.last_run, now);
        assert!(marker.last_result.unwrap().contains("\"deleted\":1"));
    }

    #[tokio::test]
    async fn test_schedule_disabled() {
        assert!(RetentionSchedule::new(0, 3_600).is_none());
        let (pruner, _, _) = seeded(&[]).await;
        assert!(pruner.run_scheduled().await.unwrap().is_none());
    }
}
