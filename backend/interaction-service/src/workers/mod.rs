pub mod dedupe_cleanup;
pub mod reconciliation;
pub mod redis_health;

pub use reconciliation::{ReconciliationConfig, ReconciliationWorker};
