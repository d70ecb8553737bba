//! Core engine: provider registry, scheduler and bulk backfill.

pub mod bulk_fetch;
pub mod manager;

pub use bulk_fetch::{BulkFetchPlan, BulkFetchRequest, BulkFetchSummary};
pub use manager::{ProviderManager, SchedulerState};
