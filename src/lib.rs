//! # recall-core
//!
//! Per-owner conversational memory: retained interactions linked into a
//! capped, symmetric graph, grouped into topical threads, and retrieved by a
//! weighted relevance score. Background maintenance decays relevance, prunes
//! stale nodes and compacts owners back under capacity.
//!
//! ## Core Components
//!
//! - **Signals**: emotional weighting and concept extraction
//! - **Memory**: owner-sharded store, connection graph and thread index
//! - **Retrieval**: relevance scoring and ranked reads
//! - **Maintenance**: decay, prune, compaction and thread archival
//! - **Conversation**: the facade a chat pipeline calls once per turn
//!
//! ## Example
//!
//! ```rust,ignore
//! use recall_core::{ConversationMemory, EmotionalState, MemoryConfig};
//!
//! let memory = ConversationMemory::from_config(MemoryConfig::from_env()?)?;
//! let state = EmotionalState { curiosity: 0.7, ..Default::default() };
//!
//! memory.record_interaction("alice", "s1", "Stuck on algebra homework", &state, &[])?;
//! let context = memory.query_relevant_memory("alice", &["algebra".into()], &state, 3);
//! let summary = memory.summarize_owner("alice");
//! ```

pub mod clock;
pub mod config;
pub mod conversation;
pub mod error;
pub mod maintenance;
pub mod memory;
mod proptest;
pub mod retrieval;
pub mod signals;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MemoryConfig;
pub use conversation::{ConversationMemory, EmotionalTrend, OwnerSummary, TrendDirection};
pub use error::{Error, Result};
pub use maintenance::{MaintenanceReport, MaintenanceScheduler};
pub use memory::{
    Connection, MemoryKind, MemoryNode, MemorySnapshot, MemoryStats, MemoryStore, MemoryThread,
    NodeId, OwnerSnapshot, ThreadId,
};
pub use retrieval::{RelevanceQuery, ScoreBreakdown, ScoredMemory};
pub use signals::{emotional_similarity, emotional_weight, extract_concepts, EmotionalState};
