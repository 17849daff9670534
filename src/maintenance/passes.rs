//! Decay, prune, compaction and archival passes.
//!
//! Each owner is processed in batches of `maintenance_batch_size` nodes. The
//! owner's write lock is taken per batch and released in between, and the
//! cancellation token is checked before every node-level step, so a cycle
//! can stop between nodes but never in the middle of mutating one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock::days_between;
use crate::error::{Error, Result};
use crate::memory::{MemoryNode, MemoryStore, NodeId, SharedShard};

/// Emotional weight below which an old, rarely used node may be pruned.
pub const PRUNE_WEIGHT_THRESHOLD: f64 = 0.3;
/// Access count below which an old node may be pruned.
pub const PRUNE_ACCESS_THRESHOLD: u64 = 2;

/// Outcome of one maintenance cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub owners_visited: usize,
    /// Nodes whose relevance was lowered
    pub decayed: usize,
    pub pruned: usize,
    pub compacted: usize,
    pub threads_archived: usize,
    /// Node-level steps that were logged and skipped
    pub failures: usize,
    /// Whether the cycle stopped early on cancellation
    pub cancelled: bool,
}

impl MaintenanceReport {
    fn absorb(&mut self, other: MaintenanceReport) {
        self.owners_visited += other.owners_visited;
        self.decayed += other.decayed;
        self.pruned += other.pruned;
        self.compacted += other.compacted;
        self.threads_archived += other.threads_archived;
        self.failures += other.failures;
        self.cancelled |= other.cancelled;
    }
}

/// Apply decay to one node up to `now`. Returns whether relevance dropped.
///
/// Decay is measured from `decayed_through`, which an access resets, so
/// repeated passes compose to `rate ^ days_since_last_access`.
pub fn decay_node(node: &mut MemoryNode, rate: f64, now: DateTime<Utc>) -> bool {
    let days = days_between(node.decayed_through, now);
    if days <= 0.0 {
        return false;
    }
    let before = node.contextual_relevance;
    node.contextual_relevance = (before * rate.powf(days)).clamp(0.0, before);
    node.decayed_through = now;
    node.contextual_relevance < before
}

/// Whether a node is old, rarely used and emotionally insignificant.
pub fn is_prunable(node: &MemoryNode, horizon_days: i64, now: DateTime<Utc>) -> bool {
    node.age_days(now) > horizon_days as f64
        && node.access_count < PRUNE_ACCESS_THRESHOLD
        && node.emotional_weight < PRUNE_WEIGHT_THRESHOLD
}

impl MemoryStore {
    /// Run one full maintenance cycle over every owner.
    ///
    /// Never fails as a whole: errors on one owner or node are logged,
    /// counted in `failures`, and skipped.
    #[instrument(skip_all)]
    pub fn run_maintenance(&self, cancel: &CancellationToken) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        let handles = match self.shard_handles() {
            Ok(handles) => handles,
            Err(e) => {
                warn!(error = %e, "maintenance could not list owners");
                report.failures += 1;
                return report;
            }
        };

        for (owner, shard) in handles {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.maintain_shard(&owner, &shard, cancel) {
                Ok(owner_report) => report.absorb(owner_report),
                Err(e) => {
                    warn!(owner = %owner, error = %e, "maintenance failed for owner");
                    report.failures += 1;
                }
            }
        }

        info!(
            owners = report.owners_visited,
            decayed = report.decayed,
            pruned = report.pruned,
            compacted = report.compacted,
            archived = report.threads_archived,
            failures = report.failures,
            cancelled = report.cancelled,
            "maintenance cycle finished"
        );
        report
    }

    /// Run one maintenance cycle for a single owner.
    pub fn maintain_owner(&self, owner_id: &str, cancel: &CancellationToken) -> Result<MaintenanceReport> {
        match self.shard(owner_id)? {
            Some(shard) => self.maintain_shard(owner_id, &shard, cancel),
            None => Ok(MaintenanceReport::default()),
        }
    }

    fn maintain_shard(
        &self,
        owner: &str,
        shard: &SharedShard,
        cancel: &CancellationToken,
    ) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport {
            owners_visited: 1,
            ..Default::default()
        };

        self.decay_pass(shard, cancel, &mut report)?;
        if !report.cancelled {
            self.prune_pass(shard, cancel, &mut report)?;
        }
        if !report.cancelled {
            self.compaction_pass(shard, cancel, &mut report)?;
        }
        if !report.cancelled {
            let now = self.clock().now();
            let mut guard = Self::write_shard(shard)?;
            report.threads_archived = guard.archive_idle_threads(self.config().thread_archive_days, now);
        }

        debug!(owner = %owner, ?report, "owner maintained");
        Ok(report)
    }

    fn node_ids(shard: &SharedShard) -> Result<Vec<NodeId>> {
        let guard = Self::read_shard(shard)?;
        Ok(guard.nodes.keys().copied().collect())
    }

    fn decay_pass(
        &self,
        shard: &SharedShard,
        cancel: &CancellationToken,
        report: &mut MaintenanceReport,
    ) -> Result<()> {
        let rate = self.config().decay_rate;
        let ids = Self::node_ids(shard)?;

        for batch in ids.chunks(self.config().maintenance_batch_size) {
            let now = self.clock().now();
            let mut guard = Self::write_shard(shard)?;
            for id in batch {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(());
                }
                // Deleted since the ID list was taken; nothing to decay
                if let Some(node) = guard.nodes.get_mut(id) {
                    if decay_node(node, rate, now) {
                        report.decayed += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn prune_pass(
        &self,
        shard: &SharedShard,
        cancel: &CancellationToken,
        report: &mut MaintenanceReport,
    ) -> Result<()> {
        let horizon = self.config().prune_horizon_days;
        let now = self.clock().now();
        let candidates: Vec<NodeId> = {
            let guard = Self::read_shard(shard)?;
            guard
                .nodes
                .values()
                .filter(|n| is_prunable(n, horizon, now))
                .map(|n| n.id)
                .collect()
        };

        for batch in candidates.chunks(self.config().maintenance_batch_size) {
            let mut removed = Vec::with_capacity(batch.len());
            {
                let mut guard = Self::write_shard(shard)?;
                if guard.retired {
                    return Ok(());
                }
                for id in batch {
                    if cancel.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    // Re-check: an access since the scan may have saved it
                    let still_prunable = guard
                        .nodes
                        .get(id)
                        .map(|n| is_prunable(n, horizon, now))
                        .unwrap_or(false);
                    if !still_prunable {
                        let err = Error::maintenance_step(*id, "no longer prunable");
                        debug!(error = %err, "skipping");
                        continue;
                    }
                    match guard.remove_node(*id) {
                        Some(_) => removed.push(*id),
                        None => {
                            warn!(error = %Error::maintenance_step(*id, "vanished during prune"), "skipping");
                            report.failures += 1;
                        }
                    }
                }
            }
            report.pruned += removed.len();
            self.forget(&removed)?;
            if report.cancelled {
                break;
            }
        }
        Ok(())
    }

    /// Rank once under the read lock, then delete in write-locked batches.
    ///
    /// A victim deleted since ranking is skipped. If new nodes arrived while
    /// the batches ran, the owner is ranked again.
    fn compaction_pass(
        &self,
        shard: &SharedShard,
        cancel: &CancellationToken,
        report: &mut MaintenanceReport,
    ) -> Result<()> {
        let capacity = self.config().capacity;
        let batch_size = self.config().maintenance_batch_size;

        loop {
            let victims = {
                let guard = Self::read_shard(shard)?;
                guard.compaction_victims(capacity, None)
            };
            if victims.is_empty() {
                return Ok(());
            }

            let mut round = 0;
            for batch in victims.chunks(batch_size) {
                let mut removed = Vec::with_capacity(batch.len());
                {
                    let mut guard = Self::write_shard(shard)?;
                    if guard.retired {
                        return Ok(());
                    }
                    for id in batch {
                        if cancel.is_cancelled() {
                            report.cancelled = true;
                            break;
                        }
                        if guard.len() <= capacity {
                            break;
                        }
                        match guard.remove_node(*id) {
                            Some(_) => removed.push(*id),
                            None => {
                                warn!(error = %Error::maintenance_step(*id, "vanished during compaction"), "skipping");
                                report.failures += 1;
                            }
                        }
                    }
                }
                round += removed.len();
                report.compacted += removed.len();
                self.forget(&removed)?;
                if report.cancelled {
                    return Ok(());
                }
            }

            if round == 0 {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MemoryConfig;
    use crate::signals::EmotionalState;
    use chrono::Duration;
    use std::sync::Arc;

    fn hints(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn setup(config: MemoryConfig) -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryStore::with_clock(config, clock.clone()).unwrap();
        (store, clock)
    }

    fn uniform(value: f64) -> EmotionalState {
        EmotionalState {
            joy: value,
            sadness: value,
            anger: value,
            fear: value,
            surprise: value,
            curiosity: value,
            ..Default::default()
        }
    }

    fn intense() -> EmotionalState {
        EmotionalState {
            fear: 0.9,
            ..uniform(1.0)
        }
    }

    #[test]
    fn test_decay_after_sixty_days() {
        let (store, clock) = setup(MemoryConfig::default().with_prune_horizon_days(365));
        let id = store
            .create_node("quiet afternoon", "alice", "s1", &EmotionalState::neutral(), &[])
            .unwrap();

        clock.advance(Duration::days(60));
        let report = store.run_maintenance(&CancellationToken::new());
        assert_eq!(report.decayed, 1);

        let relevance = store.get(id).unwrap().contextual_relevance;
        assert!((relevance - 0.95_f64.powi(60)).abs() < 1e-9);
        assert!((relevance - 0.046).abs() < 0.001);
    }

    #[test]
    fn test_repeated_passes_compose() {
        let (store, clock) = setup(MemoryConfig::default().with_prune_horizon_days(365));
        let id = store
            .create_node("quiet afternoon", "alice", "s1", &EmotionalState::neutral(), &[])
            .unwrap();

        let mut previous = 1.0;
        for _ in 0..60 {
            clock.advance(Duration::days(1));
            store.run_maintenance(&CancellationToken::new());
            let current = store.get(id).unwrap().contextual_relevance;
            assert!(current <= previous);
            previous = current;
        }
        assert!((previous - 0.95_f64.powi(60)).abs() < 1e-9);
    }

    #[test]
    fn test_decay_without_elapsed_time_is_noop() {
        let now = Utc::now();
        let (store, _) = setup(MemoryConfig::default());
        let id = store
            .create_node("hello", "alice", "s1", &EmotionalState::neutral(), &[])
            .unwrap();
        let mut node = store.get(id).unwrap();
        node.decayed_through = now + Duration::days(1);
        assert!(!decay_node(&mut node, 0.95, now));
        assert_eq!(node.contextual_relevance, 1.0);
    }

    #[test]
    fn test_prune_rules() {
        let (store, clock) = setup(MemoryConfig::default());
        let neutral = EmotionalState::neutral();
        let angry = EmotionalState {
            anger: 0.9,
            ..Default::default()
        };

        let weak = store.create_node("", "alice", "s1", &neutral, &hints(&["weather"])).unwrap();
        let strong = store.create_node("", "alice", "s1", &angry, &hints(&["argument"])).unwrap();
        let used = store.create_node("", "alice", "s1", &neutral, &hints(&["recipe"])).unwrap();
        for _ in 0..2 {
            store.retrieve("alice", &hints(&["recipe"]), &neutral, 1).unwrap();
        }
        assert_eq!(store.get(used).unwrap().access_count, 2);

        // Younger than the horizon: nothing pruned
        clock.advance(Duration::days(20));
        let report = store.run_maintenance(&CancellationToken::new());
        assert_eq!(report.pruned, 0);

        clock.advance(Duration::days(11));
        let report = store.run_maintenance(&CancellationToken::new());
        assert_eq!(report.pruned, 1);
        assert!(store.get(weak).is_err());
        assert!(store.get(strong).is_ok());
        assert!(store.get(used).is_ok());
        assert_eq!(store.integrity_violations(), 0);
    }

    #[test]
    fn test_compaction_keeps_high_weight_node() {
        // Build the over-capacity owner by import so the insert path doesn't compact first
        let (seed, _) = setup(MemoryConfig::default().with_capacity(2000));
        let half = uniform(0.5);
        let high = intense();
        let mut keeper = None;
        for i in 0..1001 {
            let state = if i == 500 { &high } else { &half };
            let id = seed
                .create_node(&format!("entry {}", i), "alice", "s1", state, &[])
                .unwrap();
            if i == 500 {
                keeper = Some(id);
            }
        }
        let keeper = keeper.unwrap();
        assert!((seed.get(keeper).unwrap().emotional_weight - 0.99).abs() < 0.01);

        let (store, _) = setup(MemoryConfig::default());
        store.import_snapshot(seed.export_snapshot().unwrap()).unwrap();
        assert_eq!(store.count("alice"), 1001);

        let report = store.run_maintenance(&CancellationToken::new());
        assert_eq!(report.compacted, 1);
        assert_eq!(store.count("alice"), 1000);
        assert!(store.get(keeper).is_ok());
        assert_eq!(store.integrity_violations(), 0);
    }

    #[test]
    fn test_insert_over_capacity_keeps_high_weight_node() {
        let (store, _) = setup(MemoryConfig::default());
        let half = uniform(0.5);
        let mut keeper = None;
        for i in 0..1001 {
            let state = if i == 10 { intense() } else { half };
            let id = store
                .create_node(&format!("entry {}", i), "alice", "s1", &state, &[])
                .unwrap();
            if i == 10 {
                keeper = Some(id);
            }
        }
        assert_eq!(store.count("alice"), 1000);
        assert!(store.get(keeper.unwrap()).is_ok());

        let report = store.run_maintenance(&CancellationToken::new());
        assert_eq!(report.compacted, 0);
        assert_eq!(store.count("alice"), 1000);
    }

    #[test]
    fn test_compaction_in_batches() {
        let (seed, _) = setup(MemoryConfig::default().with_capacity(100));
        let neutral = EmotionalState::neutral();
        for i in 0..50 {
            seed.create_node(&format!("item{}", i), "alice", "s1", &neutral, &[]).unwrap();
        }
        let config = MemoryConfig::default()
            .with_capacity(10)
            .with_maintenance_batch_size(7);
        let (store, _) = setup(config);
        store.import_snapshot(seed.export_snapshot().unwrap()).unwrap();

        let report = store.run_maintenance(&CancellationToken::new());
        assert_eq!(report.compacted, 40);
        assert_eq!(store.count("alice"), 10);
    }

    #[test]
    fn test_compaction_removes_lowest_ranked_once() {
        let (seed, _) = setup(MemoryConfig::default().with_capacity(100));
        for i in 0..50 {
            let state = uniform(i as f64 / 50.0);
            seed.create_node(&format!("entry {}", i), "alice", "s1", &state, &[]).unwrap();
        }
        let mut ranked: Vec<_> = seed
            .nodes("alice")
            .unwrap()
            .into_iter()
            .map(|n| (n.retention_rank(), n.created_at, n.id))
            .collect();
        ranked.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| b.2.cmp(&a.2))
        });
        let mut expected: Vec<NodeId> = ranked.iter().take(10).map(|r| r.2).collect();
        expected.sort();

        let config = MemoryConfig::default()
            .with_capacity(10)
            .with_maintenance_batch_size(3);
        let (store, _) = setup(config);
        store.import_snapshot(seed.export_snapshot().unwrap()).unwrap();

        let report = store.run_maintenance(&CancellationToken::new());
        assert_eq!(report.compacted, 40);
        assert_eq!(report.failures, 0);

        let mut survivors: Vec<NodeId> = store.nodes("alice").unwrap().iter().map(|n| n.id).collect();
        survivors.sort();
        assert_eq!(survivors, expected);
        assert_eq!(store.integrity_violations(), 0);
    }

    #[test]
    fn test_cancelled_cycle_stops() {
        let (store, clock) = setup(MemoryConfig::default());
        store
            .create_node("hello", "alice", "s1", &EmotionalState::neutral(), &[])
            .unwrap();
        clock.advance(Duration::days(3));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = store.run_maintenance(&cancel);
        assert!(report.cancelled);
        assert_eq!(report.decayed, 0);
    }

    #[test]
    fn test_idle_threads_archived_and_excluded() {
        let (store, clock) = setup(MemoryConfig::default().with_thread_archive_days(7));
        let neutral = EmotionalState::neutral();
        let old = store.create_node("", "alice", "s1", &neutral, &hints(&["math"])).unwrap();
        let old_thread = store.get(old).unwrap().thread_id.unwrap();

        clock.advance(Duration::days(8));
        let report = store.run_maintenance(&CancellationToken::new());
        assert_eq!(report.threads_archived, 1);
        assert!(store.threads("alice").unwrap().is_empty());
        assert_eq!(store.archived_threads("alice").unwrap()[0].id, old_thread);
        // Retained but out of retrieval scope
        assert!(store.get(old).is_ok());
        assert!(store.retrieve("alice", &hints(&["math"]), &neutral, 5).unwrap().is_empty());

        // Same topic starts a fresh active thread
        let new = store.create_node("", "alice", "s1", &neutral, &hints(&["math"])).unwrap();
        let new_thread = store.get(new).unwrap().thread_id.unwrap();
        assert_ne!(new_thread, old_thread);
        assert_eq!(store.thread("alice", old_thread).unwrap().member_node_ids, vec![old]);
    }

    #[test]
    fn test_maintain_unknown_owner() {
        let (store, _) = setup(MemoryConfig::default());
        let report = store
            .maintain_owner("nobody", &CancellationToken::new())
            .unwrap();
        assert_eq!(report, MaintenanceReport::default());
    }
}
