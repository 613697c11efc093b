//! Audit Trail
//!
//! Secondary, non-chained record of administrative operations on the ledger.

pub mod entry;
pub mod logger;

pub use entry::{AuditEntry, INTEGRITY_VERIFY, LOGS_DELETE, LOGS_PRUNE, LOGS_PRUNE_SCHEDULED};
pub use logger::{AuditPage, AuditTrail};
