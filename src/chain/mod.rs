//! Hash-chained log entries
//!
//! Canonical hashing, the entry model and integrity verification.

pub mod codec;
pub mod entry;
pub mod verify;

pub use codec::{canonical_string, entry_hash, HashedFields, CODEC_VERSION};
pub use entry::{EntrySample, LogEntry, NewLogEntry, RawLogPayload, Severity};
pub use verify::{verify_entries, ChainWalk, IntegrityVerifier, VerificationReport};
