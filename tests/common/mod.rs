#![allow(dead_code)]

use action_ledger::chain::{LogEntry, NewLogEntry};
use action_ledger::database::Database;
use action_ledger::storage::{MemoryBackend, SqliteBackend, StorageBackend};
use action_ledger::Ledger;
use std::sync::Arc;

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

/// Ledger over an in-memory SQLite database, returning the database so tests
/// can reach underneath the ledger.
pub async fn sqlite_ledger() -> (Ledger, Database) {
    let db = setup_test_db().await;
    let backend: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::from_database(&db));
    (Ledger::new(backend), db)
}

pub fn memory_ledger() -> Ledger {
    Ledger::new(Arc::new(MemoryBackend::new()))
}

pub fn login(user: &str) -> NewLogEntry {
    NewLogEntry::new("Authentication", "login").user(user)
}

/// Append `count` logins for `user`, returning the committed entries.
pub async fn append_logins(ledger: &Ledger, user: &str, count: usize) -> Vec<LogEntry> {
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(
            ledger
                .append(login(user))
                .await
                .expect("Failed to append entry"),
        );
    }
    entries
}

/// Append directly at a fixed timestamp.
pub async fn append_at(ledger: &Ledger, entry: NewLogEntry, timestamp: i64) -> LogEntry {
    ledger
        .store()
        .append_with_timestamp(entry, timestamp)
        .await
        .expect("Failed to append entry")
}
