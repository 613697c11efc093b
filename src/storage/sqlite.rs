//! SQLite storage backend.
//!
//! Appends run inside a single transaction: SQLite transactions are
//! serializable, so a concurrent writer in another process either sees the
//! new head or fails with a busy error. It can never fork the chain.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

use crate::alerts::rules::{AlertRule, RuleSpec};
use crate::audit::AuditEntry;
use crate::chain::{LogEntry, NewLogEntry, Severity};
use crate::database::Database;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{
    AuditFilter, Dimension, LogFilter, RetentionMarker, StorageBackend, Window,
};

const LOG_COLUMNS: &str =
    "id, module, action, user, ts, success, severity, ip, ua, details, prev_hash, hash";

#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_database(database: &Database) -> Self {
        Self::new(database.pool().clone())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Whether `text` asks for a free-text search. SQLite's LIKE only folds
/// ASCII case, so those rows are matched in Rust with the filter's own
/// Unicode-aware `matches` after the structured constraints ran in SQL.
fn has_text(text: &Option<String>) -> bool {
    text.as_deref().is_some_and(|t| !t.is_empty())
}

fn push_log_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &LogFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(module) = &filter.module {
        qb.push(" AND module = ").push_bind(module.clone());
    }
    if let Some(action) = &filter.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(user) = &filter.user {
        qb.push(" AND user = ").push_bind(user.clone());
    }
    if let Some(severity) = filter.severity {
        qb.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(success) = filter.success {
        qb.push(" AND success = ").push_bind(success as i64);
    }
    if let Some(from) = filter.from {
        qb.push(" AND ts >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND ts <= ").push_bind(to);
    }
}

fn push_audit_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AuditFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(entry_type) = &filter.entry_type {
        qb.push(" AND type = ").push_bind(entry_type.clone());
    }
    if let Some(actor) = &filter.actor {
        qb.push(" AND actor = ").push_bind(actor.clone());
    }
    if let Some(from) = filter.from {
        qb.push(" AND ts >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND ts <= ").push_bind(to);
    }
}

fn push_window(qb: &mut QueryBuilder<'_, Sqlite>, window: Window) {
    match window.limit {
        Some(limit) => {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        // SQLite needs a LIMIT clause before OFFSET
        None => {
            qb.push(" LIMIT -1");
        }
    }
    if window.offset > 0 {
        qb.push(" OFFSET ").push_bind(window.offset as i64);
    }
}

fn text_column(row: &SqliteRow, column: &str) -> Result<String, sqlx::Error> {
    Ok(row.try_get::<Option<String>, _>(column)?.unwrap_or_default())
}

fn row_to_entry(row: &SqliteRow) -> Result<LogEntry, sqlx::Error> {
    Ok(LogEntry {
        id: row.try_get("id")?,
        module: row.try_get("module")?,
        action: row.try_get("action")?,
        user: text_column(row, "user")?,
        timestamp: row.try_get("ts")?,
        success: row.try_get::<i64, _>("success")? != 0,
        severity: Severity::normalize(&text_column(row, "severity")?),
        ip: text_column(row, "ip")?,
        user_agent: text_column(row, "ua")?,
        details: text_column(row, "details")?,
        prev_hash: text_column(row, "prev_hash")?,
        hash: row.try_get("hash")?,
    })
}

fn row_to_audit(row: &SqliteRow) -> Result<AuditEntry, sqlx::Error> {
    Ok(AuditEntry {
        id: row.try_get("id")?,
        timestamp: row.try_get("ts")?,
        entry_type: row.try_get("type")?,
        actor: text_column(row, "actor")?,
        details: text_column(row, "details")?,
    })
}

fn row_to_rule(row: &SqliteRow) -> LedgerResult<AlertRule> {
    let id: i64 = row.try_get("id")?;
    let body: String = row.try_get("body")?;
    let spec: RuleSpec = serde_json::from_str(&body).map_err(|e| {
        LedgerError::Serialization(format!("Corrupt alert rule {}: {}", id, e))
    })?;
    Ok(AlertRule { id, spec })
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn append_entry(&self, entry: NewLogEntry, timestamp: i64) -> LedgerResult<LogEntry> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            LedgerError::StorageUnavailable(format!("Failed to begin append: {}", e))
        })?;

        let prev_hash: String =
            sqlx::query_scalar("SELECT hash FROM logs ORDER BY id DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?
                .unwrap_or_default();

        let mut committed = entry.into_entry(0, timestamp, prev_hash);

        let result = sqlx::query(
            r#"
            INSERT INTO logs (module, action, user, ts, success, severity, ip, ua, details, prev_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&committed.module)
        .bind(&committed.action)
        .bind(&committed.user)
        .bind(committed.timestamp)
        .bind(committed.success as i64)
        .bind(committed.severity.as_str())
        .bind(&committed.ip)
        .bind(&committed.user_agent)
        .bind(&committed.details)
        .bind(&committed.prev_hash)
        .bind(&committed.hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::StorageUnavailable(format!("Failed to insert log entry: {}", e)))?;

        tx.commit().await.map_err(|e| {
            LedgerError::StorageUnavailable(format!("Failed to commit log entry: {}", e))
        })?;

        committed.id = result.last_insert_rowid();
        debug!("Appended {}", committed.summary());
        Ok(committed)
    }

    async fn last_hash(&self) -> LedgerResult<String> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT hash FROM logs ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash.unwrap_or_default())
    }

    async fn select_entries(
        &self,
        filter: &LogFilter,
        window: Window,
    ) -> LedgerResult<Vec<LogEntry>> {
        let text_search = has_text(&filter.text);
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM logs", LOG_COLUMNS));
        push_log_filter(&mut qb, filter);
        qb.push(" ORDER BY ts DESC, id DESC");
        if !text_search {
            push_window(&mut qb, window);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let entries: Vec<LogEntry> = rows.iter().map(row_to_entry).collect::<Result<_, _>>()?;
        if !text_search {
            return Ok(entries);
        }
        Ok(window.apply(entries.into_iter().filter(|e| filter.matches(e))))
    }

    async fn count_entries(&self, filter: &LogFilter) -> LedgerResult<u64> {
        if has_text(&filter.text) {
            let matching = self.select_entries(filter, Window::all()).await?;
            return Ok(matching.len() as u64);
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM logs");
        push_log_filter(&mut qb, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn entries_after(&self, after_id: i64, limit: u32) -> LedgerResult<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM logs WHERE id > ? ORDER BY id ASC LIMIT ?",
            LOG_COLUMNS
        ))
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entry).collect::<Result<_, _>>()?)
    }

    async fn count_older_than(&self, cutoff: i64) -> LedgerResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs WHERE ts < ?")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn delete_older_than(&self, cutoff: i64) -> LedgerResult<u64> {
        let result = sqlx::query("DELETE FROM logs WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::StorageUnavailable(format!("Failed to delete old entries: {}", e))
            })?;
        Ok(result.rows_affected())
    }

    async fn group_counts(
        &self,
        dimension: Dimension,
        since: i64,
    ) -> LedgerResult<BTreeMap<String, u64>> {
        let column = dimension.column();
        let rows = sqlx::query(&format!(
            "SELECT {col} AS k, COUNT(*) AS c FROM logs WHERE ts > ? GROUP BY {col}",
            col = column
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let key = text_column(&row, "k")?;
            let key = match dimension {
                Dimension::Severity => Severity::normalize(&key).as_str().to_string(),
                _ => key,
            };
            let count: i64 = row.try_get("c")?;
            *counts.entry(key).or_insert(0) += count as u64;
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
        let result =
            sqlx::query("INSERT INTO audits (ts, type, actor, details) VALUES (?, ?, ?, ?)")
                .bind(timestamp)
                .bind(entry_type)
                .bind(actor)
                .bind(details)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    LedgerError::StorageUnavailable(format!("Failed to write audit entry: {}", e))
                })?;

        Ok(AuditEntry {
            id: result.last_insert_rowid(),
            timestamp,
            entry_type: entry_type.to_string(),
            actor: actor.to_string(),
            details: details.to_string(),
        })
    }

    async fn select_audits(
        &self,
        filter: &AuditFilter,
        window: Window,
    ) -> LedgerResult<Vec<AuditEntry>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT id, ts, type, actor, details FROM audits");
        let text_search = has_text(&filter.text);
        push_audit_filter(&mut qb, filter);
        qb.push(" ORDER BY ts DESC, id DESC");
        if !text_search {
            push_window(&mut qb, window);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let audits: Vec<AuditEntry> = rows.iter().map(row_to_audit).collect::<Result<_, _>>()?;
        if !text_search {
            return Ok(audits);
        }
        Ok(window.apply(audits.into_iter().filter(|a| filter.matches(a))))
    }

    async fn count_audits(&self, filter: &AuditFilter) -> LedgerResult<u64> {
        if has_text(&filter.text) {
            let matching = self.select_audits(filter, Window::all()).await?;
            return Ok(matching.len() as u64);
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audits");
        push_audit_filter(&mut qb, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn list_rules(&self) -> LedgerResult<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT id, body FROM alert_rules ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn get_rule(&self, id: i64) -> LedgerResult<Option<AlertRule>> {
        let row = sqlx::query("SELECT id, body FROM alert_rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_rule).transpose()
    }

    async fn insert_rule(&self, spec: &RuleSpec) -> LedgerResult<AlertRule> {
        let body = serde_json::to_string(spec)?;
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO alert_rules (body, created_at, updated_at) VALUES (?, ?, ?)",
        )
        .bind(&body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageUnavailable(format!("Failed to insert rule: {}", e)))?;

        Ok(AlertRule {
            id: result.last_insert_rowid(),
            spec: spec.clone(),
        })
    }

    async fn update_rule(&self, rule: &AlertRule) -> LedgerResult<bool> {
        let body = serde_json::to_string(&rule.spec)?;
        let result = sqlx::query("UPDATE alert_rules SET body = ?, updated_at = ? WHERE id = ?")
            .bind(&body)
            .bind(chrono::Utc::now().timestamp())
            .bind(rule.id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::StorageUnavailable(format!("Failed to update rule: {}", e))
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_rule(&self, id: i64) -> LedgerResult<bool> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn retention_marker(&self) -> LedgerResult<RetentionMarker> {
        let row = sqlx::query("SELECT last_run, last_result FROM retention_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(RetentionMarker {
                last_run: row.try_get("last_run")?,
                last_result: row.try_get("last_result")?,
            }),
            None => Ok(RetentionMarker::default()),
        }
    }

    async fn claim_retention_run(&self, now: i64, min_interval: i64) -> LedgerResult<bool> {
        let result =
            sqlx::query("UPDATE retention_state SET last_run = ? WHERE id = 1 AND ? - last_run >= ?")
                .bind(now)
                .bind(now)
                .bind(min_interval)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn store_retention_result(&self, result: &str) -> LedgerResult<()> {
        sqlx::query("UPDATE retention_state SET last_result = ? WHERE id = 1")
            .bind(result)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
