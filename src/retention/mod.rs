pub mod policy;
pub mod pruner;

pub use policy::{retention_days, Protections, SECONDS_PER_DAY};
pub use pruner::{PruneRequest, PruneResult, RetentionPruner, RetentionSchedule, SCHEDULED_ACTOR};
