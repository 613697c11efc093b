//! Audit Trail Entry
//!
//! Record of a maintenance or administrative operation performed on the
//! ledger itself. Audit entries are append-only but carry no hash chain.

use serde::{Deserialize, Serialize};

pub const LOGS_PRUNE: &str = "logs.prune";
pub const LOGS_PRUNE_SCHEDULED: &str = "logs.prune.scheduled";
pub const LOGS_DELETE: &str = "logs.delete";
pub const INTEGRITY_VERIFY: &str = "integrity.verify";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub actor: String,
    /// Usually JSON, but stored opaquely.
    pub details: String,
}

impl AuditEntry {
    /// Details parsed as JSON, falling back to the raw string.
    pub fn details_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.details)
            .unwrap_or_else(|_| serde_json::Value::String(self.details.clone()))
    }

    pub fn summary(&self) -> String {
        format!("{} by {} at {}", self.entry_type, self.actor, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_value() {
        let mut entry = AuditEntry {
            id: 1,
            timestamp: 10,
            entry_type: LOGS_PRUNE.to_string(),
            actor: "system".to_string(),
            details: r#"{"matched":2}"#.to_string(),
        };
        assert_eq!(entry.details_value()["matched"], 2);

        entry.details = "id=4;ts=10".to_string();
        assert_eq!(entry.details_value(), "id=4;ts=10");
    }

    #[test]
    fn test_type_field_name() {
        let entry = AuditEntry {
            id: 1,
            timestamp: 10,
            entry_type: INTEGRITY_VERIFY.to_string(),
            actor: "cli".to_string(),
            details: String::new(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "integrity.verify");
    }
}
