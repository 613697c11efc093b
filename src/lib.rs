pub mod alerts;
pub mod api;
pub mod audit;
pub mod chain;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod retention;
pub mod stats;
pub mod storage;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
