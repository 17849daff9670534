//! Per-owner memory graph.
//!
//! Nodes are retained interactions. Each owner's nodes form an undirected,
//! symmetric graph of capped size, and every node is filed into exactly one
//! thread keyed by its primary topic.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recall_core::{EmotionalState, MemoryConfig, MemoryStore};
//!
//! let store = MemoryStore::new(MemoryConfig::default())?;
//! let state = EmotionalState { curiosity: 0.8, ..Default::default() };
//! let id = store.create_node("Working on algebra homework", "alice", "s1", &state, &[])?;
//!
//! let related = store.retrieve("alice", &["algebra".to_string()], &state, 5)?;
//! ```

mod classify;
mod graph;
mod shard;
mod snapshot;
mod store;
mod threads;
mod types;

pub use classify::classify;
pub use graph::{link_score, shared_topics, topic_jaccard, EMOTIONAL_LINK_THRESHOLD};
pub use snapshot::{MemorySnapshot, OwnerSnapshot, SNAPSHOT_VERSION};
pub use store::MemoryStore;
pub(crate) use store::SharedShard;
pub use types::{
    Connection, MemoryKind, MemoryNode, MemoryStats, MemoryThread, NodeId, ThreadId,
    GENERAL_TOPIC,
};
