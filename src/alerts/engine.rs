//! Alert Engine
//!
//! Stateless evaluation of rules against the log store. Threshold rules count
//! matching entries in the window; pattern rules test each matching entry's
//! signature (`action|module|user|severity`) against the rule's regex.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::alerts::notifier::{AlertEvent, AlertNotification, AlertStats, NotificationDispatcher};
use crate::alerts::pattern::compile_pattern;
use crate::alerts::rules::{AlertRule, RuleCondition, RuleKind, RuleStore};
use crate::chain::{EntrySample, LogEntry};
use crate::error::LedgerResult;
use crate::store::LogStore;

pub const MAX_SAMPLES: usize = 3;

/// Per-rule evaluation result. Computed on request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub rule_id: i64,
    pub kind: RuleKind,
    pub enabled: bool,
    pub window: i64,
    pub triggered: bool,
    pub count: u64,
    pub matches: u64,
    pub samples: Vec<EntrySample>,
}

impl Evaluation {
    fn idle(rule: &AlertRule, window: i64) -> Self {
        Self {
            rule_id: rule.id,
            kind: rule.kind(),
            enabled: rule.is_enabled(),
            window,
            triggered: false,
            count: 0,
            matches: 0,
            samples: Vec::new(),
        }
    }
}

fn rule_regex(rule: &AlertRule, pattern: &str) -> Option<Regex> {
    match compile_pattern(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Alert rule {} has an unusable pattern: {}", rule.id, e);
            None
        }
    }
}

#[derive(Clone)]
pub struct AlertEngine {
    store: LogStore,
    rules: RuleStore,
    dispatcher: Option<Arc<NotificationDispatcher>>,
}

impl AlertEngine {
    pub fn new(store: LogStore, rules: RuleStore) -> Self {
        Self {
            store,
            rules,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn dispatcher(&self) -> Option<&Arc<NotificationDispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Whether fire-on-write has anywhere to deliver.
    pub fn notifies(&self) -> bool {
        self.dispatcher.as_ref().map_or(false, |d| !d.is_empty())
    }

    pub async fn evaluate_rules(
        &self,
        rules: &[AlertRule],
        window_override: Option<i64>,
    ) -> LedgerResult<Vec<Evaluation>> {
        self.evaluate_rules_at(rules, window_override, chrono::Utc::now().timestamp())
            .await
    }

    pub async fn evaluate_rules_at(
        &self,
        rules: &[AlertRule],
        window_override: Option<i64>,
        now: i64,
    ) -> LedgerResult<Vec<Evaluation>> {
        let mut evaluations = Vec::with_capacity(rules.len());
        for rule in rules {
            evaluations.push(self.evaluate_rule(rule, window_override, now).await?);
        }
        Ok(evaluations)
    }

    /// Evaluate every stored rule, disabled ones included.
    pub async fn evaluate_all(&self, window_override: Option<i64>) -> LedgerResult<Vec<Evaluation>> {
        let rules = self.rules.all().await?;
        self.evaluate_rules(&rules, window_override).await
    }

    /// Window `[now - window, now]`, bounds inclusive. Disabled rules are not
    /// evaluated and never trigger.
    pub async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        window_override: Option<i64>,
        now: i64,
    ) -> LedgerResult<Evaluation> {
        let window = window_override
            .filter(|w| *w > 0)
            .unwrap_or(rule.spec.window_seconds);
        let mut evaluation = Evaluation::idle(rule, window);
        if !rule.is_enabled() {
            return Ok(evaluation);
        }

        let filter = rule.spec.filters.to_log_filter(Some(now - window), Some(now));

        match &rule.spec.condition {
            RuleCondition::Threshold { threshold_count } => {
                evaluation.count = self.store.count(&filter).await?;
                evaluation.triggered = evaluation.count >= u64::from(*threshold_count);
                evaluation.samples = self
                    .store
                    .recent(&filter, MAX_SAMPLES as u32)
                    .await?
                    .iter()
                    .map(EntrySample::from)
                    .collect();
            }
            RuleCondition::Pattern { pattern } => {
                let candidates = self.store.select_all(&filter).await?;
                evaluation.count = candidates.len() as u64;
                if let Some(regex) = rule_regex(rule, pattern) {
                    let hits: Vec<&LogEntry> = candidates
                        .iter()
                        .filter(|e| regex.is_match(&e.signature()))
                        .collect();
                    evaluation.matches = hits.len() as u64;
                    evaluation.triggered = !hits.is_empty();
                    evaluation.samples = hits
                        .into_iter()
                        .take(MAX_SAMPLES)
                        .map(EntrySample::from)
                        .collect();
                }
            }
        }

        debug!(
            "Rule {} evaluated: triggered={} count={} matches={}",
            rule.id, evaluation.triggered, evaluation.count, evaluation.matches
        );
        Ok(evaluation)
    }

    /// Rules that fire because of the freshly committed `entry`.
    ///
    /// Only enabled rules whose equality filters accept the entry are
    /// considered. Pattern rules test this entry alone; threshold rules count
    /// the whole window.
    pub async fn triggered_by(&self, entry: &LogEntry) -> LedgerResult<Vec<AlertNotification>> {
        let now = chrono::Utc::now().timestamp().max(entry.timestamp);
        let mut fired = Vec::new();

        for rule in self.rules.enabled().await? {
            if !rule.spec.filters.matches(entry) {
                continue;
            }

            let stats = match &rule.spec.condition {
                RuleCondition::Threshold { threshold_count } => {
                    let filter = rule
                        .spec
                        .filters
                        .to_log_filter(Some(now - rule.spec.window_seconds), Some(now));
                    let count = self.store.count(&filter).await?;
                    if count < u64::from(*threshold_count) {
                        continue;
                    }
                    AlertStats { count, matches: 0 }
                }
                RuleCondition::Pattern { pattern } => {
                    let hit = rule_regex(&rule, pattern)
                        .map_or(false, |regex| regex.is_match(&entry.signature()));
                    if !hit {
                        continue;
                    }
                    // No window query for a single-entry match, so no count.
                    AlertStats {
                        count: 0,
                        matches: 1,
                    }
                }
            };

            fired.push(AlertNotification {
                rule,
                event: AlertEvent::from(entry),
                stats,
            });
        }

        Ok(fired)
    }

    /// Evaluate and deliver for one committed entry. Errors are logged here;
    /// nothing is returned to the append path.
    pub async fn fire_on_write(&self, entry: &LogEntry) -> usize {
        let dispatcher = match &self.dispatcher {
            Some(dispatcher) if !dispatcher.is_empty() => dispatcher,
            _ => return 0,
        };

        let fired = match self.triggered_by(entry).await {
            Ok(fired) => fired,
            Err(e) => {
                warn!("Fire-on-write evaluation for entry {} failed: {}", entry.id, e);
                return 0;
            }
        };

        for notification in &fired {
            dispatcher.dispatch(notification).await;
        }
        fired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::Notifier;
    use crate::alerts::rules::RuleDraft;
    use crate::chain::{NewLogEntry, Severity};
    use crate::error::LedgerResult;
    use crate::storage::{MemoryBackend, StorageBackend};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    const NOW: i64 = 1_700_000_000;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<AlertNotification>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, notification: &AlertNotification) -> LedgerResult<()> {
            self.seen.lock().await.push(notification.clone());
            Ok(())
        }
    }

    fn engine() -> (AlertEngine, LogStore, RuleStore) {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let store = LogStore::new(backend.clone());
        let rules = RuleStore::new(backend);
        (AlertEngine::new(store.clone(), rules.clone()), store, rules)
    }

    async fn login(store: &LogStore, user: &str, ts: i64) {
        store
            .append_with_timestamp(
                NewLogEntry::new("Authentication", "login").user(user),
                ts,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_threshold_rule() {
        let (engine, store, rules) = engine();
        let rule = rules
            .create(RuleDraft::threshold(3, 60).module("Authentication"))
            .await
            .unwrap();

        login(&store, "a", NOW - 30).await;
        login(&store, "b", NOW - 20).await;
        let eval = engine.evaluate_rule(&rule, None, NOW).await.unwrap();
        assert!(!eval.triggered);
        assert_eq!(eval.count, 2);

        login(&store, "c", NOW - 10).await;
        let eval = engine.evaluate_rule(&rule, None, NOW).await.unwrap();
        assert!(eval.triggered);
        assert_eq!(eval.count, 3);
        assert_eq!(eval.samples.len(), 3);
        assert_eq!(eval.samples[0].user, "c");
        assert_eq!(eval.window, 60);
    }

    #[tokio::test]
    async fn test_window_bounds_and_override() {
        let (engine, store, rules) = engine();
        let rule = rules.create(RuleDraft::threshold(2, 60)).await.unwrap();

        login(&store, "old", NOW - 61).await;
        login(&store, "edge", NOW - 60).await;
        let eval = engine.evaluate_rule(&rule, None, NOW).await.unwrap();
        assert_eq!(eval.count, 1);

        let eval = engine.evaluate_rule(&rule, Some(120), NOW).await.unwrap();
        assert_eq!(eval.count, 2);
        assert_eq!(eval.window, 120);
        assert!(eval.triggered);
    }

    #[tokio::test]
    async fn test_pattern_rule_samples_only_hits() {
        let (engine, store, rules) = engine();
        let rule = rules
            .create(RuleDraft::pattern("^login\\|", 300))
            .await
            .unwrap();

        store
            .append_with_timestamp(NewLogEntry::new("Authentication", "logout"), NOW - 5)
            .await
            .unwrap();
        let eval = engine.evaluate_rule(&rule, None, NOW).await.unwrap();
        assert!(!eval.triggered);
        assert_eq!(eval.count, 1);
        assert_eq!(eval.matches, 0);
        assert!(eval.samples.is_empty());

        login(&store, "alice", NOW - 4).await;
        let eval = engine.evaluate_rule(&rule, None, NOW).await.unwrap();
        assert!(eval.triggered);
        assert_eq!(eval.matches, 1);
        assert_eq!(eval.samples.len(), 1);
        assert_eq!(eval.samples[0].action, "login");
    }

    #[tokio::test]
    async fn test_disabled_rule_short_circuits() {
        let (engine, store, rules) = engine();
        let rule = rules
            .create(RuleDraft::threshold(1, 60).enabled(false))
            .await
            .unwrap();
        login(&store, "a", NOW).await;

        let evals = engine.evaluate_rules_at(&[rule], None, NOW).await.unwrap();
        assert_eq!(evals.len(), 1);
        assert!(!evals[0].triggered);
        assert_eq!(evals[0].count, 0);
        assert!(!evals[0].enabled);
    }

    #[tokio::test]
    async fn test_fire_on_write_respects_filters() {
        let (engine, store, rules) = engine();
        let recording = Arc::new(Recording::default());
        let engine = engine.with_dispatcher(Arc::new(
            NotificationDispatcher::new().with_notifier(recording.clone()),
        ));

        rules
            .create(RuleDraft::pattern("/LOGIN/i", 60).severity(Severity::Danger))
            .await
            .unwrap();
        rules
            .create(RuleDraft::threshold(1, 60).module("Payroll"))
            .await
            .unwrap();

        let quiet = store
            .append(NewLogEntry::new("Authentication", "login"))
            .await
            .unwrap();
        assert_eq!(engine.fire_on_write(&quiet).await, 0);

        let loud = store
            .append(
                NewLogEntry::new("Authentication", "login")
                    .severity(Severity::Danger)
                    .details("not sent"),
            )
            .await
            .unwrap();
        assert_eq!(engine.fire_on_write(&loud).await, 1);

        let seen = recording.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event.id, loud.id);
        assert_eq!(seen[0].stats, AlertStats { count: 0, matches: 1 });
        assert_eq!(engine.dispatcher().unwrap().delivered(), 1);
    }
}
