//! Ledger
//!
//! Wires the store, verifier, pruner, audit trail, rule store, alert engine
//! and stats aggregator over one storage backend selected at startup.

use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::{
    AlertEngine, Evaluation, NotificationDispatcher, Notifier, RuleStore, WebhookNotifier,
};
use crate::audit::{AuditPage, AuditTrail, INTEGRITY_VERIFY};
use crate::chain::{IntegrityVerifier, LogEntry, NewLogEntry, RawLogPayload, VerificationReport};
use crate::config::{AppConfig, BackendKind};
use crate::database::Database;
use crate::error::LedgerResult;
use crate::retention::{
    Protections, PruneRequest, PruneResult, RetentionPruner, RetentionSchedule,
};
use crate::stats::{StatsAggregator, StatsResult};
use crate::storage::{AuditFilter, LogFilter, MemoryBackend, SqliteBackend, StorageBackend};
use crate::store::{LogStore, QueryPage};

#[derive(Clone)]
pub struct Ledger {
    store: LogStore,
    verifier: IntegrityVerifier,
    audit: AuditTrail,
    pruner: RetentionPruner,
    rules: RuleStore,
    engine: AlertEngine,
    stats: StatsAggregator,
}

pub struct LedgerBuilder {
    backend: Arc<dyn StorageBackend>,
    protections: Protections,
    schedule: Option<RetentionSchedule>,
    dispatcher: Option<Arc<NotificationDispatcher>>,
}

impl LedgerBuilder {
    pub fn protections(mut self, protections: Protections) -> Self {
        self.protections = protections;
        self
    }

    pub fn schedule(mut self, schedule: Option<RetentionSchedule>) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Ledger {
        let backend = self.backend;
        let store = LogStore::new(backend.clone());
        let audit = AuditTrail::new(backend.clone());
        let rules = RuleStore::new(backend.clone());

        let pruner = RetentionPruner::new(store.clone(), audit.clone())
            .with_defaults(self.protections)
            .with_schedule(self.schedule);

        let mut engine = AlertEngine::new(store.clone(), rules.clone());
        if let Some(dispatcher) = self.dispatcher {
            engine = engine.with_dispatcher(dispatcher);
        }

        Ledger {
            verifier: IntegrityVerifier::new(backend.clone()),
            stats: StatsAggregator::new(backend),
            store,
            audit,
            pruner,
            rules,
            engine,
        }
    }
}

impl Ledger {
    pub fn builder(backend: Arc<dyn StorageBackend>) -> LedgerBuilder {
        LedgerBuilder {
            backend,
            protections: Protections::default(),
            schedule: None,
            dispatcher: None,
        }
    }

    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::builder(backend).build()
    }

    /// Open the configured backend, apply migrations and wire notifiers.
    pub async fn from_config(config: &AppConfig) -> LedgerResult<Self> {
        config.validate()?;

        let backend: Arc<dyn StorageBackend> = match config.database.backend_kind()? {
            BackendKind::Memory => {
                warn!("Using in-memory storage: entries will not survive a restart");
                Arc::new(MemoryBackend::new())
            }
            BackendKind::Sqlite => {
                let database =
                    Database::new(&config.database.url, config.database.max_connections).await?;
                database.run_migrations().await?;
                if config.database.immutable || config.database.strict_immutable {
                    database
                        .install_immutability_triggers(config.database.strict_immutable)
                        .await?;
                }
                Arc::new(SqliteBackend::from_database(&database))
            }
        };

        let mut dispatcher = NotificationDispatcher::new();
        if let Some(url) = config.alerts.webhook() {
            let webhook: Arc<dyn Notifier> =
                Arc::new(WebhookNotifier::new(url, config.alerts.timeout())?);
            dispatcher = dispatcher.with_notifier(webhook);
            info!("Fire-on-write notifications go to {}", url);
        }

        let ledger = Self::builder(backend)
            .protections(config.retention.protections())
            .schedule(config.retention.schedule())
            .dispatcher(Arc::new(dispatcher))
            .build();
        info!("Ledger ready on {} storage", ledger.backend_name());
        Ok(ledger)
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Append and, once committed, evaluate fire-on-write rules on a detached
    /// task.
    pub async fn append(&self, entry: NewLogEntry) -> LedgerResult<LogEntry> {
        let committed = self.store.append(entry).await?;

        if self.engine.notifies() {
            let engine = self.engine.clone();
            let entry = committed.clone();
            tokio::spawn(async move {
                engine.fire_on_write(&entry).await;
            });
        }

        Ok(committed)
    }

    pub async fn append_raw(&self, payload: RawLogPayload) -> LedgerResult<LogEntry> {
        self.append(payload.normalize()).await
    }

    pub async fn query(
        &self,
        filter: &LogFilter,
        page: u32,
        page_size: u32,
    ) -> LedgerResult<QueryPage> {
        self.store.query(filter, page, page_size).await
    }

    pub async fn count(&self, filter: &LogFilter) -> LedgerResult<u64> {
        self.store.count(filter).await
    }

    /// Full verification, recorded in the audit trail.
    pub async fn verify(&self, actor: &str) -> LedgerResult<VerificationReport> {
        let report = self.verifier.verify().await?;
        if !report.valid {
            warn!("{}", report.summary());
        }
        self.audit.record_json(INTEGRITY_VERIFY, actor, &report).await?;
        Ok(report)
    }

    pub async fn verify_range(
        &self,
        from_id: i64,
        to_id: Option<i64>,
    ) -> LedgerResult<VerificationReport> {
        self.verifier.verify_range(from_id, to_id).await
    }

    pub async fn prune(&self, request: PruneRequest, actor: &str) -> LedgerResult<PruneResult> {
        self.pruner.prune(request, actor).await
    }

    pub async fn run_scheduled_prune(&self) -> LedgerResult<Option<PruneResult>> {
        self.pruner.run_scheduled().await
    }

    /// Evaluate every stored rule.
    pub async fn evaluate_rules(&self, window_override: Option<i64>) -> LedgerResult<Vec<Evaluation>> {
        self.engine.evaluate_all(window_override).await
    }

    pub async fn stats(&self, window_seconds: i64) -> LedgerResult<StatsResult> {
        self.stats.compute(window_seconds).await
    }

    pub async fn audits(
        &self,
        filter: &AuditFilter,
        page: u32,
        per_page: u32,
    ) -> LedgerResult<AuditPage> {
        self.audit.query(filter, page, per_page).await
    }
}
