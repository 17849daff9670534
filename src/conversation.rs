//! Boundary facade used by the conversation pipeline.
//!
//! [`ConversationMemory`] is the surface a chat loop talks to: record each
//! completed turn, fetch relevant memories before composing a reply, and
//! summarize an owner for a "continuing our conversation" opener. Reads never
//! fail; internal errors are logged and degrade to "no memory available".

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use crate::memory::{MemoryNode, MemoryStore, NodeId};
use crate::signals::EmotionalState;

/// Mean-weight difference between the newer and older half that counts as a change.
pub const TREND_THRESHOLD: f64 = 0.05;

/// Most recent topics listed in a summary.
pub const MAX_RECENT_TOPICS: usize = 10;

/// Direction of an owner's recent emotional weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    #[default]
    Steady,
}

/// Emotional picture of an owner's latest nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionalTrend {
    /// Field-wise mean of the sampled states
    pub average_state: EmotionalState,
    pub average_weight: f64,
    pub direction: TrendDirection,
    /// Nodes the trend was computed over
    pub sample_size: usize,
}

/// Read-only digest of an owner's memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerSummary {
    pub owner_id: String,
    /// Topics of the most recently active threads, newest first
    pub recent_topics: Vec<String>,
    pub recent_emotional_trend: EmotionalTrend,
    /// Highest retention rank first
    pub key_memories: Vec<MemoryNode>,
}

/// Facade over a shared [`MemoryStore`].
#[derive(Clone)]
pub struct ConversationMemory {
    store: Arc<MemoryStore>,
}

impl ConversationMemory {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Build a facade over a fresh store.
    pub fn from_config(config: MemoryConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(MemoryStore::new(config)?)))
    }

    /// The underlying store, e.g. for a [`MaintenanceScheduler`](crate::maintenance::MaintenanceScheduler).
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Record one completed user turn.
    ///
    /// `topic_hints` may be empty. Empty owner or session IDs are rejected;
    /// out-of-range emotional fields are clamped, not rejected.
    #[instrument(skip(self, text, state, topic_hints))]
    pub fn record_interaction(
        &self,
        owner_id: &str,
        session_id: &str,
        text: &str,
        state: &EmotionalState,
        topic_hints: &[String],
    ) -> Result<NodeId> {
        if owner_id.trim().is_empty() {
            return Err(Error::invalid_input("owner id must not be empty"));
        }
        if session_id.trim().is_empty() {
            return Err(Error::invalid_input("session id must not be empty"));
        }
        if let Err(e) = state.validate() {
            debug!(error = %e, "clamping emotional state");
        }
        self.store
            .create_node(text, owner_id, session_id, state, topic_hints)
    }

    /// Memories relevant to the current turn, best first.
    ///
    /// Never fails: any internal error is logged and yields an empty result.
    pub fn query_relevant_memory(
        &self,
        owner_id: &str,
        current_topics: &[String],
        state: &EmotionalState,
        limit: usize,
    ) -> Vec<MemoryNode> {
        match self
            .store
            .retrieve(owner_id, current_topics, &state.clamped(), limit)
        {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(owner = %owner_id, error = %e, "memory query failed; continuing without memory");
                Vec::new()
            }
        }
    }

    /// Summarize an owner without counting as an access.
    ///
    /// Nodes filed in archived threads are left out.
    pub fn summarize_owner(&self, owner_id: &str) -> OwnerSummary {
        match self.try_summarize(owner_id) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(owner = %owner_id, error = %e, "summary failed; returning empty summary");
                OwnerSummary {
                    owner_id: owner_id.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    fn try_summarize(&self, owner_id: &str) -> Result<OwnerSummary> {
        let mut summary = OwnerSummary {
            owner_id: owner_id.to_string(),
            ..Default::default()
        };
        let Some(shard) = self.store.shard(owner_id)? else {
            return Ok(summary);
        };
        let config = self.store.config();
        let guard = MemoryStore::read_shard(&shard)?;

        let mut seen = HashSet::new();
        summary.recent_topics = guard
            .active_threads()
            .into_iter()
            .filter(|t| seen.insert(t.topic.as_str()))
            .take(MAX_RECENT_TOPICS)
            .map(|t| t.topic.clone())
            .collect();

        let live: Vec<&MemoryNode> = guard
            .nodes
            .values()
            .filter(|n| !guard.is_archived(n))
            .collect();

        // Nodes are keyed by creation order, so the tail is the most recent
        let recent_start = live.len().saturating_sub(config.summary_recent_nodes);
        summary.recent_emotional_trend = emotional_trend(&live[recent_start..]);

        let mut ranked = live;
        ranked.sort_by(|a, b| {
            b.retention_rank()
                .total_cmp(&a.retention_rank())
                .then_with(|| b.id.cmp(&a.id))
        });
        summary.key_memories = ranked
            .into_iter()
            .take(config.summary_key_memories)
            .cloned()
            .collect();

        Ok(summary)
    }
}

/// Trend over nodes in chronological order.
pub fn emotional_trend(nodes: &[&MemoryNode]) -> EmotionalTrend {
    if nodes.is_empty() {
        return EmotionalTrend::default();
    }

    let average_state = EmotionalState::mean(nodes.iter().map(|n| &n.emotional_state));
    let average_weight = mean_weight(nodes);

    let direction = if nodes.len() < 2 {
        TrendDirection::Steady
    } else {
        let (older, newer) = nodes.split_at(nodes.len() / 2);
        let delta = mean_weight(newer) - mean_weight(older);
        if delta > TREND_THRESHOLD {
            TrendDirection::Rising
        } else if delta < -TREND_THRESHOLD {
            TrendDirection::Falling
        } else {
            TrendDirection::Steady
        }
    };

    EmotionalTrend {
        average_state,
        average_weight,
        direction,
        sample_size: nodes.len(),
    }
}

fn mean_weight(nodes: &[&MemoryNode]) -> f64 {
    if nodes.is_empty() {
        return 0.0;
    }
    nodes.iter().map(|n| n.emotional_weight).sum::<f64>() / nodes.len() as f64
}
