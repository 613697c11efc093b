//! Log Entry
//!
//! Defines the structure for tamper-evident log entries and the normalized
//! input accepted by the append path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chain::codec::{self, HashedFields};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Danger,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Danger => "danger",
        }
    }

    /// Unknown values fall back to `info`.
    pub fn normalize(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl FromStr for Severity {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "danger" => Ok(Severity::Danger),
            other => Err(LedgerError::Validation(format!(
                "Unknown severity '{}': expected info, warning or danger",
                other
            ))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed, immutable log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub module: String,
    pub action: String,
    pub user: String,
    pub timestamp: i64,
    pub success: bool,
    pub severity: Severity,
    pub ip: String,
    pub user_agent: String,
    pub details: String,
    pub prev_hash: String,
    pub hash: String,
}

impl LogEntry {
    pub fn hashed_fields(&self) -> HashedFields<'_> {
        HashedFields {
            module: &self.module,
            action: &self.action,
            user: &self.user,
            timestamp: self.timestamp,
            success: self.success,
            ip: &self.ip,
            user_agent: &self.user_agent,
        }
    }

    /// Recompute this entry's hash on top of `prev_hash`.
    pub fn compute_hash(&self, prev_hash: &str) -> String {
        codec::entry_hash(prev_hash, &self.hashed_fields())
    }

    /// Check the stored hash against the stored `prev_hash`.
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash(&self.prev_hash)
    }

    /// `action|module|user|severity`, the string pattern rules match against.
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.action,
            self.module,
            self.user,
            self.severity.as_str()
        )
    }

    pub fn summary(&self) -> String {
        format!(
            "#{} {}:{} by '{}' ({})",
            self.id,
            self.module,
            self.action,
            self.user,
            if self.success { "ok" } else { "failed" }
        )
    }
}

/// Trimmed projection of an entry used in alert samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySample {
    pub id: i64,
    pub timestamp: i64,
    pub module: String,
    pub action: String,
    pub user: String,
    pub severity: Severity,
    pub success: bool,
}

impl From<&LogEntry> for EntrySample {
    fn from(entry: &LogEntry) -> Self {
        Self {
            id: entry.id,
            timestamp: entry.timestamp,
            module: entry.module.clone(),
            action: entry.action.clone(),
            user: entry.user.clone(),
            severity: entry.severity,
            success: entry.success,
        }
    }
}

/// Fields supplied by the caller of `Append`; id, timestamp and hashes are
/// assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub details: String,
}

fn default_success() -> bool {
    true
}

impl NewLogEntry {
    pub fn new(module: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            success: true,
            ..Default::default()
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Reject entries without module or action.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.module.is_empty() {
            return Err(LedgerError::missing_field("module"));
        }
        if self.action.is_empty() {
            return Err(LedgerError::missing_field("action"));
        }
        Ok(())
    }

    pub fn hashed_fields(&self, timestamp: i64) -> HashedFields<'_> {
        HashedFields {
            module: &self.module,
            action: &self.action,
            user: &self.user,
            timestamp,
            success: self.success,
            ip: &self.ip,
            user_agent: &self.user_agent,
        }
    }

    /// Materialize the committed entry once the store has assigned its
    /// position in the chain.
    pub fn into_entry(self, id: i64, timestamp: i64, prev_hash: String) -> LogEntry {
        let hash = codec::entry_hash(&prev_hash, &self.hashed_fields(timestamp));
        LogEntry {
            id,
            module: self.module,
            action: self.action,
            user: self.user,
            timestamp,
            success: self.success,
            severity: self.severity,
            ip: self.ip,
            user_agent: self.user_agent,
            details: self.details,
            prev_hash,
            hash,
        }
    }
}

/// Loosely-typed append payload as received from an API caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLogPayload {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub user: String,
    pub success: Option<serde_json::Value>,
    pub severity: Option<String>,
    pub ip: Option<String>,
    #[serde(alias = "ua")]
    pub user_agent: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl RawLogPayload {
    /// Normalize severity, success and details into a [`NewLogEntry`].
    pub fn normalize(self) -> NewLogEntry {
        NewLogEntry {
            module: self.module,
            action: self.action,
            user: self.user,
            success: normalize_success(self.success.as_ref()),
            severity: self
                .severity
                .as_deref()
                .map(Severity::normalize)
                .unwrap_or_default(),
            ip: self.ip.unwrap_or_default(),
            user_agent: self.user_agent.unwrap_or_default(),
            details: normalize_details(self.details),
        }
    }
}

/// Anything other than an explicit zero/false counts as success.
pub fn normalize_success(value: Option<&serde_json::Value>) -> bool {
    use serde_json::Value;
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !matches!(s.trim(), "0" | "false"),
        Some(_) => true,
    }
}

/// Objects and arrays are stored as compact JSON, strings are trimmed.
pub fn normalize_details(value: Option<serde_json::Value>) -> String {
    use serde_json::Value;
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}
