//! Periodic upkeep: relevance decay, pruning, capacity compaction and
//! thread archival.
//!
//! [`MemoryStore::run_maintenance`](crate::memory::MemoryStore::run_maintenance)
//! runs one cycle synchronously. [`MaintenanceScheduler`] drives it on a
//! tokio interval until cancelled.

mod passes;
mod scheduler;

pub use passes::{
    decay_node, is_prunable, MaintenanceReport, PRUNE_ACCESS_THRESHOLD, PRUNE_WEIGHT_THRESHOLD,
};
pub use scheduler::MaintenanceScheduler;
