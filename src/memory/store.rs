//! Owner-sharded in-memory store.
//!
//! Every owner gets its own [`OwnerShard`] behind an `RwLock`. All mutations
//! of one owner's data take that owner's write lock, so creates, deletes and
//! maintenance on the same owner are mutually exclusive while different
//! owners never contend. A new node is linked and filed before the write
//! lock is released, so readers never see it half-connected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use crate::signals::{emotional_weight, extract_concepts, EmotionalState};

use super::classify::classify;
use super::shard::OwnerShard;
use super::types::{MemoryNode, MemoryStats, MemoryThread, NodeId, ThreadId};

pub(crate) type SharedShard = Arc<RwLock<OwnerShard>>;

/// Relevance-scored memory graph for many owners.
pub struct MemoryStore {
    config: MemoryConfig,
    clock: Arc<dyn Clock>,
    shards: RwLock<HashMap<String, SharedShard>>,
    /// Node to owner, for lookups by ID alone
    directory: RwLock<HashMap<NodeId, String>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create a store using wall-clock time. The configuration is validated.
    pub fn new(config: MemoryConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store with an explicit time source.
    pub fn with_clock(config: MemoryConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            shards: RwLock::new(HashMap::new()),
            directory: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ==================== Shard Access ====================

    pub(crate) fn shard(&self, owner_id: &str) -> Result<Option<SharedShard>> {
        let shards = self.shards.read().map_err(|_| Error::poisoned("shard map"))?;
        Ok(shards.get(owner_id).cloned())
    }

    fn shard_or_create(&self, owner_id: &str) -> Result<SharedShard> {
        if let Some(shard) = self.shard(owner_id)? {
            return Ok(shard);
        }
        let mut shards = self.shards.write().map_err(|_| Error::poisoned("shard map"))?;
        Ok(shards
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(OwnerShard::new(owner_id))))
            .clone())
    }

    pub(crate) fn read_shard(shard: &SharedShard) -> Result<RwLockReadGuard<'_, OwnerShard>> {
        shard.read().map_err(|_| Error::poisoned("owner shard"))
    }

    pub(crate) fn write_shard(shard: &SharedShard) -> Result<RwLockWriteGuard<'_, OwnerShard>> {
        shard.write().map_err(|_| Error::poisoned("owner shard"))
    }

    pub(crate) fn shard_handles(&self) -> Result<Vec<(String, SharedShard)>> {
        let shards = self.shards.read().map_err(|_| Error::poisoned("shard map"))?;
        let mut handles: Vec<(String, SharedShard)> = shards
            .iter()
            .map(|(owner, shard)| (owner.clone(), shard.clone()))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(handles)
    }

    fn owner_of(&self, id: NodeId) -> Result<Option<String>> {
        let directory = self
            .directory
            .read()
            .map_err(|_| Error::poisoned("node directory"))?;
        Ok(directory.get(&id).cloned())
    }

    /// Drop directory entries for removed nodes.
    pub(crate) fn forget(&self, ids: &[NodeId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut directory = self
            .directory
            .write()
            .map_err(|_| Error::poisoned("node directory"))?;
        for id in ids {
            directory.remove(id);
        }
        Ok(())
    }

    // ==================== Node Operations ====================

    /// Create a node for a new interaction.
    ///
    /// Computes the emotional weight and topics (extracted concepts followed by
    /// any new hint tokens), classifies the kind, links the node into the
    /// connection graph and files it into a thread, all under the owner's
    /// write lock. If the owner is now over capacity, the lowest-ranked other
    /// nodes are compacted away immediately.
    #[instrument(skip(self, content, emotional_state, topic_hints))]
    pub fn create_node(
        &self,
        content: &str,
        owner_id: &str,
        session_id: &str,
        emotional_state: &EmotionalState,
        topic_hints: &[String],
    ) -> Result<NodeId> {
        if owner_id.trim().is_empty() {
            return Err(Error::invalid_input("owner id must not be empty"));
        }

        let state = emotional_state.clamped();
        let weight = emotional_weight(&state);
        let topics = merge_topics(extract_concepts(content), topic_hints);
        let kind = classify(&topics, weight);

        let now = self.clock.now();
        let node = MemoryNode {
            id: NodeId(0),
            owner_id: owner_id.to_string(),
            session_id: session_id.to_string(),
            content: content.to_string(),
            kind,
            topics,
            emotional_state: state,
            emotional_weight: weight,
            contextual_relevance: 1.0,
            connection_strength: 0.0,
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
            decayed_through: now,
            connections: BTreeMap::new(),
            thread_id: None,
        };

        loop {
            let shard = self.shard_or_create(owner_id)?;
            let mut guard = Self::write_shard(&shard)?;
            if guard.retired {
                debug!(owner = %owner_id, "owner shard replaced by import; retrying");
                continue;
            }
            return self.insert_locked(&mut guard, node);
        }
    }

    /// Link, file and register a node in a locked, live shard.
    fn insert_locked(&self, guard: &mut OwnerShard, mut node: MemoryNode) -> Result<NodeId> {
        let now = self.clock.now();
        let id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let kind = node.kind;
        let weight = node.emotional_weight;
        node.id = id;
        node.created_at = now;
        node.last_accessed_at = now;
        node.decayed_through = now;

        guard.nodes.insert(id, node);
        guard.link_new_node(id, self.config.scan_window, self.config.max_connections, now);
        guard.file_node(id, now);

        {
            let mut directory = self
                .directory
                .write()
                .map_err(|_| Error::poisoned("node directory"))?;
            directory.insert(id, guard.owner_id.clone());
        }

        if guard.len() > self.config.capacity {
            let err = Error::CapacityExceeded {
                owner: guard.owner_id.clone(),
                count: guard.len(),
                capacity: self.config.capacity,
            };
            debug!(error = %err, "compacting on insert");
            let removed = self.compact_locked(guard, Some(id));
            self.forget(&removed)?;
        }

        debug!(node = %id, kind = %kind, weight, "created node");
        Ok(id)
    }

    /// Delete excess nodes from a locked shard. Returns the removed IDs.
    pub(crate) fn compact_locked(
        &self,
        shard: &mut OwnerShard,
        protect: Option<NodeId>,
    ) -> Vec<NodeId> {
        let victims = shard.compaction_victims(self.config.capacity, protect);
        let mut removed = Vec::with_capacity(victims.len());
        for id in victims {
            match shard.remove_node(id) {
                Some(_) => removed.push(id),
                None => warn!(error = %Error::maintenance_step(id, "vanished before compaction"), "skipping"),
            }
        }
        removed
    }

    /// Get a node by ID. Does not count as an access.
    pub fn get(&self, id: NodeId) -> Result<MemoryNode> {
        let owner = self.owner_of(id)?.ok_or_else(|| Error::node_not_found(id))?;
        let shard = self.shard(&owner)?.ok_or_else(|| Error::node_not_found(id))?;
        let guard = Self::read_shard(&shard)?;
        guard
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::node_not_found(id))
    }

    /// Delete a node and every reference to it.
    ///
    /// Returns whether a node was removed; deleting a missing ID is a no-op.
    #[instrument(skip(self))]
    pub fn delete(&self, id: NodeId) -> Result<bool> {
        let removal = loop {
            let Some(owner) = self.owner_of(id)? else {
                return Ok(false);
            };
            let Some(shard) = self.shard(&owner)? else {
                self.forget(&[id])?;
                return Ok(false);
            };
            let mut guard = Self::write_shard(&shard)?;
            if !guard.retired {
                break guard.remove_node(id);
            }
        };
        self.forget(&[id])?;

        match removal {
            Some(removal) => {
                if removal.healed > 0 {
                    debug!(node = %id, healed = removal.healed, "removed dangling references");
                }
                debug!(node = %id, kind = %removal.node.kind, "deleted node");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of nodes held for an owner.
    pub fn count(&self, owner_id: &str) -> usize {
        match self.shard(owner_id) {
            Ok(Some(shard)) => Self::read_shard(&shard).map(|g| g.len()).unwrap_or(0),
            _ => 0,
        }
    }

    /// All nodes of an owner in creation order. Does not count as an access.
    pub fn nodes(&self, owner_id: &str) -> Result<Vec<MemoryNode>> {
        let Some(shard) = self.shard(owner_id)? else {
            return Ok(Vec::new());
        };
        let guard = Self::read_shard(&shard)?;
        Ok(guard.nodes.values().cloned().collect())
    }

    /// Owners with a shard, sorted.
    pub fn owners(&self) -> Result<Vec<String>> {
        Ok(self
            .shard_handles()?
            .into_iter()
            .map(|(owner, _)| owner)
            .collect())
    }

    // ==================== Thread Operations ====================

    /// Active threads of an owner, most recently active first.
    pub fn threads(&self, owner_id: &str) -> Result<Vec<MemoryThread>> {
        let Some(shard) = self.shard(owner_id)? else {
            return Ok(Vec::new());
        };
        let guard = Self::read_shard(&shard)?;
        Ok(guard.active_threads().into_iter().cloned().collect())
    }

    /// Archived threads of an owner.
    pub fn archived_threads(&self, owner_id: &str) -> Result<Vec<MemoryThread>> {
        let Some(shard) = self.shard(owner_id)? else {
            return Ok(Vec::new());
        };
        let guard = Self::read_shard(&shard)?;
        Ok(guard.archived.values().cloned().collect())
    }

    /// Get an active or archived thread.
    pub fn thread(&self, owner_id: &str, id: ThreadId) -> Result<MemoryThread> {
        let shard = self
            .shard(owner_id)?
            .ok_or_else(|| Error::thread_not_found(id))?;
        let guard = Self::read_shard(&shard)?;
        guard
            .thread(&id)
            .cloned()
            .ok_or_else(|| Error::thread_not_found(id))
    }

    /// Statistics across all owners.
    pub fn stats(&self) -> Result<MemoryStats> {
        let mut stats = MemoryStats::default();
        for (_, shard) in self.shard_handles()? {
            let guard = Self::read_shard(&shard)?;
            stats.owners += 1;
            stats.total_nodes += guard.len();
            stats.active_threads += guard.threads.len();
            stats.archived_threads += guard.archived.len();
            let mut link_ends = 0;
            for node in guard.nodes.values() {
                link_ends += node.connections.len();
                *stats.nodes_by_kind.entry(node.kind).or_insert(0) += 1;
            }
            stats.total_connections += link_ends / 2;
        }
        Ok(stats)
    }

    // ==================== Snapshot Support ====================

    /// Replace all contents. Used by snapshot import.
    pub(crate) fn replace_contents(&self, shards: Vec<OwnerShard>, next_id: u64) -> Result<()> {
        let mut map = HashMap::new();
        let mut directory = HashMap::new();
        let mut max_id = 0;
        for shard in shards {
            for id in shard.nodes.keys() {
                directory.insert(*id, shard.owner_id.clone());
                max_id = max_id.max(id.0);
            }
            map.insert(shard.owner_id.clone(), Arc::new(RwLock::new(shard)));
        }

        let mut shards_guard = self.shards.write().map_err(|_| Error::poisoned("shard map"))?;
        // Writers already holding an old shard finish before it is retired
        for shard in shards_guard.values() {
            Self::write_shard(shard)?.retired = true;
        }
        let mut directory_guard = self
            .directory
            .write()
            .map_err(|_| Error::poisoned("node directory"))?;
        *shards_guard = map;
        *directory_guard = directory;
        self.next_id
            .store(next_id.max(max_id + 1), Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Check symmetry and thread membership for every owner.
    #[cfg(test)]
    pub(crate) fn integrity_violations(&self) -> usize {
        self.shard_handles()
            .unwrap()
            .iter()
            .map(|(_, s)| s.read().unwrap().integrity_violations())
            .sum()
    }

    /// Directory entries whose node is not in the owner's live shard.
    #[cfg(test)]
    pub(crate) fn directory_orphans(&self) -> usize {
        let directory = self.directory.read().unwrap().clone();
        directory
            .iter()
            .filter(|(id, owner)| match self.shard(owner).unwrap() {
                Some(shard) => !shard.read().unwrap().nodes.contains_key(*id),
                None => true,
            })
            .count()
    }
}

/// Extracted concepts followed by normalized hints not already present.
fn merge_topics(mut topics: Vec<String>, hints: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = topics.iter().cloned().collect();
    for hint in hints {
        let hint = hint.trim().to_lowercase();
        if !hint.is_empty() && seen.insert(hint.clone()) {
            topics.push(hint);
        }
    }
    topics
}
