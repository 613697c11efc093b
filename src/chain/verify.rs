//! Integrity Verification
//!
//! Re-walks the log in id order, recomputing every hash through the codec and
//! reporting the first inconsistency. Verification is read-only; it pages
//! through the store so only committed rows are ever observed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::entry::LogEntry;
use crate::error::LedgerResult;
use crate::storage::StorageBackend;

pub const VERIFY_CHUNK_SIZE: u32 = 500;

/// Outcome of a verification pass. A broken chain is a normal outcome, not
/// an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub break_at_id: Option<i64>,
    pub checked: u64,
}

impl VerificationReport {
    pub fn summary(&self) -> String {
        match self.break_at_id {
            None => format!("Chain intact ({} entries checked)", self.checked),
            Some(id) => format!(
                "Chain broken at entry {} ({} entries verified before the break)",
                id, self.checked
            ),
        }
    }
}

/// Running state of a chain walk.
#[derive(Debug, Clone)]
pub struct ChainWalk {
    expected_prev: String,
    checked: u64,
    break_at_id: Option<i64>,
}

impl ChainWalk {
    /// Walk anchored at `expected_prev` (`""` for the start of the chain).
    pub fn anchored(expected_prev: impl Into<String>) -> Self {
        Self {
            expected_prev: expected_prev.into(),
            checked: 0,
            break_at_id: None,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.break_at_id.is_some()
    }

    /// Check one entry. Returns false once the chain has diverged.
    pub fn step(&mut self, entry: &LogEntry) -> bool {
        if self.is_broken() {
            return false;
        }
        if entry.prev_hash != self.expected_prev {
            warn!(
                "prev_hash mismatch at entry {}: expected '{}', found '{}'",
                entry.id, self.expected_prev, entry.prev_hash
            );
            self.break_at_id = Some(entry.id);
            return false;
        }
        if entry.compute_hash(&self.expected_prev) != entry.hash {
            warn!("Hash mismatch at entry {}", entry.id);
            self.break_at_id = Some(entry.id);
            return false;
        }
        self.expected_prev = entry.hash.clone();
        self.checked += 1;
        true
    }

    pub fn finish(self) -> VerificationReport {
        VerificationReport {
            valid: self.break_at_id.is_none(),
            break_at_id: self.break_at_id,
            checked: self.checked,
        }
    }
}

/// Verify a slice of entries already ordered by id, starting from an empty
/// predecessor.
pub fn verify_entries(entries: &[LogEntry]) -> VerificationReport {
    let mut walk = ChainWalk::anchored("");
    for entry in entries {
        if !walk.step(entry) {
            break;
        }
    }
    walk.finish()
}

#[derive(Clone)]
pub struct IntegrityVerifier {
    backend: Arc<dyn StorageBackend>,
    chunk_size: u32,
}

impl IntegrityVerifier {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            chunk_size: VERIFY_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Full walk from the first entry with an empty expected predecessor.
    pub async fn verify(&self) -> LedgerResult<VerificationReport> {
        let report = self.walk(0, None, None).await?;
        info!("Integrity verification: {}", report.summary());
        Ok(report)
    }

    /// Walk entries with `from_id <= id <= to_id`, anchored on the stored
    /// `prev_hash` of the first entry in range. This is how a chain whose head
    /// was pruned is checked.
    pub async fn verify_range(
        &self,
        from_id: i64,
        to_id: Option<i64>,
    ) -> LedgerResult<VerificationReport> {
        let after_id = from_id.saturating_sub(1).max(0);
        let first = self.backend.entries_after(after_id, 1).await?;
        let anchor = match first.first() {
            Some(entry) if to_id.map_or(true, |to| entry.id <= to) => entry.prev_hash.clone(),
            _ => {
                return Ok(VerificationReport {
                    valid: true,
                    break_at_id: None,
                    checked: 0,
                })
            }
        };

        let report = self.walk(after_id, Some(anchor), to_id).await?;
        info!(
            "Ranged integrity verification from {}: {}",
            from_id,
            report.summary()
        );
        Ok(report)
    }

    async fn walk(
        &self,
        mut after_id: i64,
        anchor: Option<String>,
        to_id: Option<i64>,
    ) -> LedgerResult<VerificationReport> {
        let mut walk = ChainWalk::anchored(anchor.unwrap_or_default());

        'chunks: loop {
            let chunk = self.backend.entries_after(after_id, self.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }
            debug!("Verifying {} entries after id {}", chunk.len(), after_id);

            for entry in &chunk {
                if to_id.map_or(false, |to| entry.id > to) {
                    break 'chunks;
                }
                if !walk.step(entry) {
                    break 'chunks;
                }
                after_id = entry.id;
            }

            if (chunk.len() as u32) < self.chunk_size {
                break;
            }
        }

        Ok(walk.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::entry::NewLogEntry;

    fn chain(n: usize) -> Vec<LogEntry> {
        let mut prev = String::new();
        (0..n)
            .map(|i| {
                let entry = NewLogEntry::new("Authentication", "login")
                    .user(format!("user{}", i))
                    .into_entry(i as i64 + 1, 1_700_000_000 + i as i64, prev.clone());
                prev = entry.hash.clone();
                entry
            })
            .collect()
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let report = verify_entries(&[]);
        assert_eq!(
            report,
            VerificationReport {
                valid: true,
                break_at_id: None,
                checked: 0
            }
        );
    }

    #[test]
    fn test_intact_chain() {
        let report = verify_entries(&chain(10));
        assert!(report.valid);
        assert_eq!(report.checked, 10);
    }

    #[test]
    fn test_tampered_field_breaks_at_entry() {
        let mut entries = chain(3);
        entries[1].user = "mallory".to_string();
        let report = verify_entries(&entries);
        assert!(!report.valid);
        assert_eq!(report.break_at_id, Some(2));
        assert_eq!(report.checked, 1);
    }

    #[test]
    fn test_rehashed_entry_breaks_at_successor() {
        let mut entries = chain(4);
        entries[1].user = "mallory".to_string();
        entries[1].hash = entries[1].compute_hash(&entries[1].prev_hash);
        let report = verify_entries(&entries);
        assert_eq!(report.break_at_id, Some(3));
    }

    #[test]
    fn test_details_not_covered() {
        let mut entries = chain(2);
        entries[0].details = "rewritten".to_string();
        assert!(verify_entries(&entries).valid);
    }

    #[test]
    fn test_missing_head_breaks_at_first() {
        let entries = chain(3);
        let report = verify_entries(&entries[1..]);
        assert_eq!(report.break_at_id, Some(2));
        assert_eq!(report.checked, 0);
    }
}
