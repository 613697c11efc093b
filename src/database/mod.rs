pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                LedgerError::Config(format!("Invalid database url {}: {}", database_url, e))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                LedgerError::StorageUnavailable(format!(
                    "Failed to connect to {}: {}",
                    database_url, e
                ))
            })?;

        info!("Connected to {}", database_url);
        Ok(Database { pool })
    }

    /// Single-connection in-memory database with the schema applied. The
    /// connection is pinned so the data lives as long as the pool.
    pub async fn new_in_memory() -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let database = Database { pool };
        database.run_migrations().await?;
        Ok(database)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> LedgerResult<()> {
        for step in schema::migrations() {
            sqlx::query(step).execute(&self.pool).await.map_err(|e| {
                LedgerError::StorageUnavailable(format!("Migration failed: {}", e))
            })?;
        }
        debug!("Schema migrations applied");
        Ok(())
    }

    /// Block updates to committed log rows and mirror every delete into the
    /// audit trail. With `strict`, deletes are blocked as well, which also
    /// disables pruning.
    pub async fn install_immutability_triggers(&self, strict: bool) -> LedgerResult<()> {
        let mut triggers = vec![schema::TRIGGER_NO_UPDATE, schema::TRIGGER_DELETE_AUDIT];
        if strict {
            triggers.push(schema::TRIGGER_NO_DELETE);
        }
        for trigger in triggers {
            sqlx::query(trigger).execute(&self.pool).await.map_err(|e| {
                LedgerError::StorageUnavailable(format!("Failed to install trigger: {}", e))
            })?;
        }
        info!("Immutability triggers installed (strict: {})", strict);
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
