//! In-process storage backend.
//!
//! Every mutation happens under one write lock, so appends are trivially
//! serialized and readers only ever see whole entries. Nothing survives a
//! restart.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::alerts::rules::{AlertRule, RuleSpec};
use crate::audit::AuditEntry;
use crate::chain::{LogEntry, NewLogEntry};
use crate::error::LedgerResult;
use crate::storage::{
    AuditFilter, Dimension, LogFilter, RetentionMarker, StorageBackend, Window,
};

#[derive(Default)]
struct MemoryState {
    entries: Vec<LogEntry>,
    next_entry_id: i64,
    audits: Vec<AuditEntry>,
    next_audit_id: i64,
    rules: BTreeMap<i64, AlertRule>,
    next_rule_id: i64,
    marker: RetentionMarker,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(items: Vec<&T>, window: Window) -> Vec<T> {
    window.apply(items.into_iter().cloned())
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn append_entry(&self, entry: NewLogEntry, timestamp: i64) -> LedgerResult<LogEntry> {
        let mut state = self.state.write().await;
        let prev_hash = state
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_default();
        let id = next_id(&mut state.next_entry_id);
        let entry = entry.into_entry(id, timestamp, prev_hash);
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn last_hash(&self) -> LedgerResult<String> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_default())
    }

    async fn select_entries(
        &self,
        filter: &LogFilter,
        window: Window,
    ) -> LedgerResult<Vec<LogEntry>> {
        let state = self.state.read().await;
        let mut matching: Vec<&LogEntry> =
            state.entries.iter().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(paginate(matching, window))
    }

    async fn count_entries(&self, filter: &LogFilter) -> LedgerResult<u64> {
        let state = self.state.read().await;
        Ok(state.entries.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn entries_after(&self, after_id: i64, limit: u32) -> LedgerResult<Vec<LogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.id > after_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_older_than(&self, cutoff: i64) -> LedgerResult<u64> {
        let state = self.state.read().await;
        Ok(state.entries.iter().filter(|e| e.timestamp < cutoff).count() as u64)
    }

    async fn delete_older_than(&self, cutoff: i64) -> LedgerResult<u64> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|e| e.timestamp >= cutoff);
        Ok((before - state.entries.len()) as u64)
    }

    async fn group_counts(
        &self,
        dimension: Dimension,
        since: i64,
    ) -> LedgerResult<BTreeMap<String, u64>> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for entry in state.entries.iter().filter(|e| e.timestamp > since) {
            *counts
                .entry(dimension.value_of(entry).to_string())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn insert_audit(
        &self,
        entry_type: &str,
        actor: &str,
        details: &str,
        timestamp: i64,
    ) -> LedgerResult<AuditEntry> {
        let mut state = self.state.write().await;
        let entry = AuditEntry {
            id: next_id(&mut state.next_audit_id),
            timestamp,
            entry_type: entry_type.to_string(),
            actor: actor.to_string(),
            details: details.to_string(),
        };
        state.audits.push(entry.clone());
        Ok(entry)
    }

    async fn select_audits(
        &self,
        filter: &AuditFilter,
        window: Window,
    ) -> LedgerResult<Vec<AuditEntry>> {
        let state = self.state.read().await;
        let mut matching: Vec<&AuditEntry> =
            state.audits.iter().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(paginate(matching, window))
    }

    async fn count_audits(&self, filter: &AuditFilter) -> LedgerResult<u64> {
        let state = self.state.read().await;
        Ok(state.audits.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn list_rules(&self) -> LedgerResult<Vec<AlertRule>> {
        let state = self.state.read().await;
        Ok(state.rules.values().cloned().collect())
    }

    async fn get_rule(&self, id: i64) -> LedgerResult<Option<AlertRule>> {
        let state = self.state.read().await;
        Ok(state.rules.get(&id).cloned())
    }

    async fn insert_rule(&self, spec: &RuleSpec) -> LedgerResult<AlertRule> {
        let mut state = self.state.write().await;
        let rule = AlertRule {
            id: next_id(&mut state.next_rule_id),
            spec: spec.clone(),
        };
        state.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, rule: &AlertRule) -> LedgerResult<bool> {
        let mut state = self.state.write().await;
        match state.rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_rule(&self, id: i64) -> LedgerResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.rules.remove(&id).is_some())
    }

    async fn retention_marker(&self) -> LedgerResult<RetentionMarker> {
        Ok(self.state.read().await.marker.clone())
    }

    async fn claim_retention_run(&self, now: i64, min_interval: i64) -> LedgerResult<bool> {
        let mut state = self.state.write().await;
        if now - state.marker.last_run < min_interval {
            return Ok(false);
        }
        state.marker.last_run = now;
        Ok(true)
    }

    async fn store_retention_result(&self, result: &str) -> LedgerResult<()> {
        self.state.write().await.marker.last_result = Some(result.to_string());
        Ok(())
    }
}
