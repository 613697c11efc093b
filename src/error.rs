use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(format!("Database error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn missing_field(field: &str) -> Self {
        Self::Validation(format!("{} is required", field))
    }

    pub fn rule_not_found(id: i64) -> Self {
        Self::NotFound(format!("Alert rule {} not found", id))
    }

    pub fn max_days_exceeded(days: i64, max_days: i64) -> Self {
        Self::PolicyViolation(format!(
            "Retention window of {} days exceeds max_days protection ({})",
            days, max_days
        ))
    }

    pub fn min_remaining_violated(remaining: u64, min_remaining: u64) -> Self {
        Self::PolicyViolation(format!(
            "min_remaining would be violated: {} entries would remain, {} required",
            remaining, min_remaining
        ))
    }

    /// Whether the error was raised before any storage was touched.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::PolicyViolation(_)
        )
    }
}
