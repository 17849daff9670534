//! Per-owner arena of nodes and threads.
//!
//! Nodes and threads refer to each other only by ID, so deleting a node is a
//! matter of removing its entry and scrubbing the ID lists that mention it.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::Error;

use super::types::{MemoryNode, MemoryThread, NodeId, ThreadId};

/// All nodes and threads belonging to one owner.
#[derive(Debug, Clone)]
pub(crate) struct OwnerShard {
    pub(crate) owner_id: String,
    /// Nodes in creation order
    pub(crate) nodes: BTreeMap<NodeId, MemoryNode>,
    /// Active threads
    pub(crate) threads: BTreeMap<ThreadId, MemoryThread>,
    /// Primary topic to active thread
    pub(crate) topic_index: HashMap<String, ThreadId>,
    /// Threads moved out of the active index, kept for audit
    pub(crate) archived: BTreeMap<ThreadId, MemoryThread>,
    /// Set when an import swapped this shard out of the store. Writers that
    /// find it set must look the owner up again.
    pub(crate) retired: bool,
}

/// What a node removal touched.
#[derive(Debug)]
pub(crate) struct Removal {
    pub(crate) node: MemoryNode,
    /// Dangling references found and dropped on the way
    pub(crate) healed: usize,
}

impl OwnerShard {
    pub(crate) fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            nodes: BTreeMap::new(),
            threads: BTreeMap::new(),
            topic_index: HashMap::new(),
            archived: BTreeMap::new(),
            retired: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether a node sits in an archived thread.
    pub(crate) fn is_archived(&self, node: &MemoryNode) -> bool {
        node.thread_id
            .map(|tid| self.archived.contains_key(&tid))
            .unwrap_or(false)
    }

    /// Look up a thread in either the active or archived set.
    pub(crate) fn thread(&self, id: &ThreadId) -> Option<&MemoryThread> {
        self.threads.get(id).or_else(|| self.archived.get(id))
    }

    /// Remove a node and every reference to it.
    ///
    /// Peers lose their back-link and get their strength recomputed; the
    /// owning thread loses the member. A peer that no longer exists is a
    /// dangling reference: it is logged and dropped.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Option<Removal> {
        let node = self.nodes.remove(&id)?;
        let mut healed = 0;

        for peer_id in node.connections.keys() {
            match self.nodes.get_mut(peer_id) {
                Some(peer) => {
                    if peer.connections.remove(&id).is_none() {
                        warn!(node = %id, peer = %peer_id, "one-sided connection found during delete");
                        healed += 1;
                    }
                    peer.refresh_connection_strength();
                }
                None => {
                    let err = Error::maintenance_step(
                        id,
                        format!("dangling connection to missing node {}", peer_id),
                    );
                    warn!(error = %err, "self-healing dangling connection");
                    healed += 1;
                }
            }
        }

        if let Some(thread_id) = node.thread_id {
            let removed = match self.threads.get_mut(&thread_id) {
                Some(thread) => thread.remove_member(id),
                None => self
                    .archived
                    .get_mut(&thread_id)
                    .map(|t| t.remove_member(id))
                    .unwrap_or(false),
            };
            if !removed {
                warn!(node = %id, thread = %thread_id, "node missing from its thread during delete");
                healed += 1;
            }
        }

        Some(Removal { node, healed })
    }

    /// Nodes to delete so that at most `capacity` remain.
    ///
    /// Lowest retention rank goes first; among equals the older node goes
    /// first. `protect` is never selected.
    pub(crate) fn compaction_victims(
        &self,
        capacity: usize,
        protect: Option<NodeId>,
    ) -> Vec<NodeId> {
        let excess = self.nodes.len().saturating_sub(capacity);
        if excess == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(f64, DateTime<Utc>, NodeId)> = self
            .nodes
            .values()
            .filter(|n| Some(n.id) != protect)
            .map(|n| (n.retention_rank(), n.created_at, n.id))
            .collect();

        ranked.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        ranked.into_iter().take(excess).map(|(_, _, id)| id).collect()
    }

    /// Check that every connection is reciprocated and every thread member
    /// exists. Returns the number of violations.
    #[cfg(test)]
    pub(crate) fn integrity_violations(&self) -> usize {
        let mut violations = 0;
        for node in self.nodes.values() {
            for peer_id in node.connections.keys() {
                let reciprocated = self
                    .nodes
                    .get(peer_id)
                    .map(|p| p.is_connected_to(node.id))
                    .unwrap_or(false);
                if !reciprocated {
                    violations += 1;
                }
            }
        }
        for thread in self.threads.values().chain(self.archived.values()) {
            violations += thread
                .member_node_ids
                .iter()
                .filter(|id| !self.nodes.contains_key(id))
                .count();
        }
        violations
    }
}
