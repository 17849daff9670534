//! Core memory types: nodes, threads, and their identifiers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::days_between;
use crate::signals::EmotionalState;

/// Connection strength contributed by each link.
const STRENGTH_PER_CONNECTION: f64 = 0.1;
/// Access count at which the access term of the retention rank saturates.
const ACCESS_SATURATION: f64 = 100.0;

/// Unique identifier for a memory node.
///
/// Allocated from a store-wide counter, so ordering follows creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a memory thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub Uuid);

impl ThreadId {
    /// Generate a new random thread ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a memory represents, classified once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Something that happened in the conversation
    Experience,
    /// A fact or piece of understanding
    Knowledge,
    /// A recurring behaviour or habit
    Pattern,
    /// A strongly felt lesson or insight
    Wisdom,
    /// Something about the relationship with the user
    Relationship,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Experience => write!(f, "experience"),
            Self::Knowledge => write!(f, "knowledge"),
            Self::Pattern => write!(f, "pattern"),
            Self::Wisdom => write!(f, "wisdom"),
            Self::Relationship => write!(f, "relationship"),
        }
    }
}

/// One side of a symmetric link between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Similarity score the link was chosen with
    pub score: f64,
    /// When the link was created
    pub linked_at: DateTime<Utc>,
}

/// A single retained interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: NodeId,
    pub owner_id: String,
    pub session_id: String,
    pub content: String,
    pub kind: MemoryKind,
    /// Ordered concept tokens extracted at creation
    pub topics: Vec<String>,
    /// Emotional state the node was recorded with (clamped)
    pub emotional_state: EmotionalState,
    /// Significance derived from `emotional_state`, in [0, 1]
    pub emotional_weight: f64,
    /// Decays between accesses, reset to 1.0 on retrieval
    pub contextual_relevance: f64,
    /// `min(1, 0.1 * connections)`
    pub connection_strength: f64,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Instant up to which decay has been applied
    pub decayed_through: DateTime<Utc>,
    /// Peers, keyed by node ID
    pub connections: BTreeMap<NodeId, Connection>,
    pub thread_id: Option<ThreadId>,
}

impl MemoryNode {
    /// Whether this node links to `other`.
    pub fn is_connected_to(&self, other: NodeId) -> bool {
        self.connections.contains_key(&other)
    }

    /// IDs of connected nodes in ascending order.
    pub fn connection_ids(&self) -> Vec<NodeId> {
        self.connections.keys().copied().collect()
    }

    /// Age in fractional days.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.created_at, now)
    }

    /// Recompute `connection_strength` from the current connection count.
    pub fn refresh_connection_strength(&mut self) {
        self.connection_strength =
            (STRENGTH_PER_CONNECTION * self.connections.len() as f64).min(1.0);
    }

    /// Record an access: bump the counter and reset decay.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
        self.decayed_through = now;
        self.contextual_relevance = 1.0;
    }

    /// Rank used to decide which nodes survive compaction.
    ///
    /// `0.4 * emotional_weight + 0.3 * connection_strength + 0.3 * min(1, access_count / 100)`
    pub fn retention_rank(&self) -> f64 {
        0.4 * self.emotional_weight
            + 0.3 * self.connection_strength
            + 0.3 * (self.access_count as f64 / ACCESS_SATURATION).min(1.0)
    }

    /// Primary topic used for thread filing.
    pub fn primary_topic(&self) -> &str {
        self.topics.first().map(String::as_str).unwrap_or(GENERAL_TOPIC)
    }
}

/// Thread topic for nodes without any concept.
pub const GENERAL_TOPIC: &str = "general";

/// An ordered grouping of one owner's nodes sharing a primary topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryThread {
    pub id: ThreadId,
    pub topic: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Running maximum of member emotional weights
    pub importance: f64,
    /// Members in the order they were filed
    pub member_node_ids: Vec<NodeId>,
}

impl MemoryThread {
    /// Create an empty thread.
    pub fn new(owner_id: impl Into<String>, topic: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ThreadId::new(),
            topic: topic.into(),
            owner_id: owner_id.into(),
            created_at: now,
            last_activity_at: now,
            importance: 0.0,
            member_node_ids: Vec::new(),
        }
    }

    /// Append a member and fold its weight into `importance`.
    pub fn append(&mut self, node_id: NodeId, emotional_weight: f64, now: DateTime<Utc>) {
        self.member_node_ids.push(node_id);
        self.importance = self.importance.max(emotional_weight);
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    /// Remove a member. Returns whether it was present.
    pub fn remove_member(&mut self, node_id: NodeId) -> bool {
        let before = self.member_node_ids.len();
        self.member_node_ids.retain(|id| *id != node_id);
        self.member_node_ids.len() != before
    }

    /// Whether the thread has seen no activity for at least `days`.
    pub fn idle_for(&self, days: i64, now: DateTime<Utc>) -> bool {
        days_between(self.last_activity_at, now) >= days as f64
    }
}

/// Statistics about the memory store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub owners: usize,
    pub total_nodes: usize,
    /// Undirected link count
    pub total_connections: usize,
    pub active_threads: usize,
    pub archived_threads: usize,
    pub nodes_by_kind: BTreeMap<MemoryKind, usize>,
}
