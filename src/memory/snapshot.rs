//! Full-state export and import for external persistence.
//!
//! A snapshot is plain serde data. The store does not care where it ends up;
//! [`MemorySnapshot::to_json`] and [`MemorySnapshot::from_json`] cover the
//! common case.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};

use super::shard::OwnerShard;
use super::store::MemoryStore;
use super::types::{MemoryNode, MemoryThread, NodeId};

/// Snapshot format version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Complete store contents at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    /// Next node ID the store would allocate
    pub next_node_id: u64,
    pub owners: Vec<OwnerSnapshot>,
}

/// One owner's nodes and threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerSnapshot {
    pub owner_id: String,
    pub nodes: Vec<MemoryNode>,
    pub threads: Vec<MemoryThread>,
    #[serde(default)]
    pub archived_threads: Vec<MemoryThread>,
}

impl MemorySnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Total number of nodes across owners.
    pub fn node_count(&self) -> usize {
        self.owners.iter().map(|o| o.nodes.len()).sum()
    }
}

impl MemoryStore {
    /// Export every owner's nodes and threads.
    ///
    /// Each owner is read under its own read lock, so the snapshot is
    /// consistent per owner but not across owners.
    pub fn export_snapshot(&self) -> Result<MemorySnapshot> {
        let mut owners = Vec::new();
        for (owner_id, shard) in self.shard_handles()? {
            let guard = Self::read_shard(&shard)?;
            owners.push(OwnerSnapshot {
                owner_id,
                nodes: guard.nodes.values().cloned().collect(),
                threads: guard.threads.values().cloned().collect(),
                archived_threads: guard.archived.values().cloned().collect(),
            });
        }
        Ok(MemorySnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: self.clock().now(),
            next_node_id: self.peek_next_id(),
            owners,
        })
    }

    /// Replace the store contents with a snapshot.
    ///
    /// Connections to missing or foreign nodes, one-sided connections and
    /// thread members that do not exist are dropped with a warning. Capacity
    /// is not enforced here; the next maintenance cycle compacts. Returns the
    /// number of references dropped.
    #[instrument(skip_all, fields(owners = snapshot.owners.len()))]
    pub fn import_snapshot(&self, snapshot: MemorySnapshot) -> Result<usize> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::invalid_input(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut seen_owners = HashSet::new();
        let mut shards = Vec::with_capacity(snapshot.owners.len());
        let mut dropped = 0;

        for owner in snapshot.owners {
            if owner.owner_id.trim().is_empty() {
                return Err(Error::invalid_input("snapshot contains an empty owner id"));
            }
            if !seen_owners.insert(owner.owner_id.clone()) {
                return Err(Error::invalid_input(format!(
                    "owner {} appears twice in snapshot",
                    owner.owner_id
                )));
            }
            let (shard, owner_dropped) = rebuild_shard(owner)?;
            dropped += owner_dropped;
            shards.push(shard);
        }

        let nodes: usize = shards.iter().map(|s| s.len()).sum();
        self.replace_contents(shards, snapshot.next_node_id)?;
        info!(nodes, dropped, "imported snapshot");
        Ok(dropped)
    }
}

fn rebuild_shard(owner: OwnerSnapshot) -> Result<(OwnerShard, usize)> {
    let mut shard = OwnerShard::new(owner.owner_id.clone());
    let mut dropped = 0;

    for mut node in owner.nodes {
        if node.owner_id != owner.owner_id {
            return Err(Error::invalid_input(format!(
                "node {} belongs to {} but is listed under {}",
                node.id, node.owner_id, owner.owner_id
            )));
        }
        node.emotional_state = node.emotional_state.clamped();
        if shard.nodes.insert(node.id, node).is_some() {
            return Err(Error::invalid_input("duplicate node id in snapshot"));
        }
    }

    // Keep only links present on both ends
    let mut one_sided: Vec<(NodeId, NodeId)> = Vec::new();
    for node in shard.nodes.values() {
        for peer in node.connections.keys() {
            let reciprocated = shard
                .nodes
                .get(peer)
                .map(|p| p.is_connected_to(node.id))
                .unwrap_or(false);
            if !reciprocated {
                one_sided.push((node.id, *peer));
            }
        }
    }
    for (id, peer) in one_sided {
        warn!(
            error = %Error::maintenance_step(id, format!("unreciprocated link to {}", peer)),
            "dropping link on import"
        );
        if let Some(node) = shard.nodes.get_mut(&id) {
            node.connections.remove(&peer);
        }
        dropped += 1;
    }
    for node in shard.nodes.values_mut() {
        node.refresh_connection_strength();
    }

    let mut active: BTreeMap<_, MemoryThread> = BTreeMap::new();
    for thread in owner.threads {
        active.insert(thread.id, thread);
    }
    let mut archived: BTreeMap<_, MemoryThread> = BTreeMap::new();
    for thread in owner.archived_threads {
        if active.contains_key(&thread.id) {
            warn!(thread = %thread.id, "thread listed as both active and archived; keeping active");
            dropped += 1;
            continue;
        }
        archived.insert(thread.id, thread);
    }

    // A member must exist, point back at this thread, and appear once
    for thread in active.values_mut().chain(archived.values_mut()) {
        let before = thread.member_node_ids.len();
        let mut seen = HashSet::new();
        let thread_id = thread.id;
        thread.member_node_ids.retain(|id| {
            let belongs = shard
                .nodes
                .get(id)
                .map(|n| n.thread_id == Some(thread_id))
                .unwrap_or(false);
            belongs && seen.insert(*id)
        });
        let invalid = before - thread.member_node_ids.len();
        if invalid > 0 {
            warn!(thread = %thread.id, invalid, "dropping invalid thread members on import");
            dropped += invalid;
        }
    }

    for node in shard.nodes.values_mut() {
        if let Some(tid) = node.thread_id {
            let listed = active
                .get(&tid)
                .or_else(|| archived.get(&tid))
                .map(|t| t.member_node_ids.contains(&node.id))
                .unwrap_or(false);
            if !listed {
                warn!(node = %node.id, thread = %tid, "node not listed by its thread; refiling");
                node.thread_id = None;
                dropped += 1;
            }
        }
    }

    for thread in active.values() {
        shard.topic_index.insert(thread.topic.clone(), thread.id);
    }
    shard.threads = active;
    shard.archived = archived;

    // Nodes that lost their thread get filed as if freshly created
    let unfiled: Vec<(NodeId, DateTime<Utc>)> = shard
        .nodes
        .values()
        .filter(|n| n.thread_id.is_none())
        .map(|n| (n.id, n.created_at))
        .collect();
    for (id, created_at) in unfiled {
        shard.file_node(id, created_at);
    }

    Ok((shard, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::signals::EmotionalState;
    use pretty_assertions::assert_eq;

    fn hints(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn populated() -> MemoryStore {
        let store = MemoryStore::new(MemoryConfig::default()).unwrap();
        let neutral = EmotionalState::neutral();
        store.create_node("", "alice", "s1", &neutral, &hints(&["math"])).unwrap();
        store.create_node("", "alice", "s1", &neutral, &hints(&["math", "exam"])).unwrap();
        store.create_node("", "bob", "s2", &neutral, &hints(&["chess"])).unwrap();
        store
    }

    #[test]
    fn test_export_import_preserves_state() {
        let source = populated();
        let snapshot = source.export_snapshot().unwrap();
        assert_eq!(snapshot.node_count(), 3);

        let json = snapshot.to_json().unwrap();
        let restored = MemoryStore::new(MemoryConfig::default()).unwrap();
        let dropped = restored
            .import_snapshot(MemorySnapshot::from_json(&json).unwrap())
            .unwrap();
        assert_eq!(dropped, 0);

        assert_eq!(restored.nodes("alice").unwrap(), source.nodes("alice").unwrap());
        assert_eq!(restored.threads("alice").unwrap(), source.threads("alice").unwrap());
        assert_eq!(restored.stats().unwrap(), source.stats().unwrap());
        assert_eq!(restored.integrity_violations(), 0);
    }

    #[test]
    fn test_ids_continue_after_import() {
        let source = populated();
        let restored = MemoryStore::new(MemoryConfig::default()).unwrap();
        restored.import_snapshot(source.export_snapshot().unwrap()).unwrap();

        let id = restored
            .create_node("", "alice", "s1", &EmotionalState::neutral(), &hints(&["math"]))
            .unwrap();
        assert_eq!(id, NodeId(4));
        // New node joins the imported thread
        let threads = restored.threads("alice").unwrap();
        let math = threads.iter().find(|t| t.topic == "math").unwrap();
        assert_eq!(math.member_node_ids.len(), 3);
    }

    #[test]
    fn test_import_drops_dangling_references() {
        let source = populated();
        let mut snapshot = source.export_snapshot().unwrap();
        let alice = snapshot
            .owners
            .iter_mut()
            .find(|o| o.owner_id == "alice")
            .unwrap();
        let removed = alice.nodes.remove(0);
        assert!(!removed.connections.is_empty());

        let restored = MemoryStore::new(MemoryConfig::default()).unwrap();
        let dropped = restored.import_snapshot(snapshot).unwrap();
        assert_eq!(dropped, 2);

        let survivor = &restored.nodes("alice").unwrap()[0];
        assert!(survivor.connections.is_empty());
        assert_eq!(survivor.connection_strength, 0.0);
        assert_eq!(restored.integrity_violations(), 0);
    }

    #[test]
    fn test_import_drops_member_claimed_by_another_thread() {
        let source = MemoryStore::new(MemoryConfig::default()).unwrap();
        let neutral = EmotionalState::neutral();
        let math = source.create_node("", "alice", "s1", &neutral, &hints(&["math"])).unwrap();
        source.create_node("", "alice", "s1", &neutral, &hints(&["chess"])).unwrap();

        let mut snapshot = source.export_snapshot().unwrap();
        let alice = &mut snapshot.owners[0];
        let chess = alice.threads.iter_mut().find(|t| t.topic == "chess").unwrap();
        chess.member_node_ids.push(math);
        chess.member_node_ids.push(math);

        let restored = MemoryStore::new(MemoryConfig::default()).unwrap();
        let dropped = restored.import_snapshot(snapshot).unwrap();
        assert_eq!(dropped, 2);

        let chess = restored
            .threads("alice")
            .unwrap()
            .into_iter()
            .find(|t| t.topic == "chess")
            .unwrap();
        assert!(!chess.member_node_ids.contains(&math));

        restored.delete(math).unwrap();
        for thread in restored.threads("alice").unwrap() {
            assert!(!thread.member_node_ids.contains(&math));
        }
        assert_eq!(restored.integrity_violations(), 0);
    }

    #[test]
    fn test_import_replaces_contents() {
        let store = populated();
        let empty = MemoryStore::new(MemoryConfig::default())
            .unwrap()
            .export_snapshot()
            .unwrap();
        store.import_snapshot(empty).unwrap();
        assert_eq!(store.stats().unwrap().total_nodes, 0);
        assert!(store.owners().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_wrong_version() {
        let store = populated();
        let mut snapshot = store.export_snapshot().unwrap();
        snapshot.version = 99;
        let err = store.import_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        // Contents untouched
        assert_eq!(store.count("alice"), 2);
    }

    #[test]
    fn test_malformed_json() {
        let err = MemorySnapshot::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
