//! Relevance retrieval: the primary read path.
//!
//! Candidates are scored with a fixed weighted sum (weights add up to 1.0,
//! every term in [0, 1]):
//!
//! | term | weight |
//! |------|--------|
//! | fraction of the node's topics present in the current topics | 0.30 |
//! | fraction of context tokens found in the node's content | 0.20 |
//! | emotional similarity to the current state | 0.20 |
//! | node emotional weight | 0.20 |
//! | recency, `exp(-age_days / 30)` | 0.10 |
//!
//! Ties break on `last_accessed_at` descending, then node ID ascending.
//! Returned nodes count as accessed; nothing else is touched.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::memory::{MemoryNode, MemoryStore, NodeId};
use crate::signals::{emotional_similarity, extract_concepts, EmotionalState};

pub const TOPIC_OVERLAP_WEIGHT: f64 = 0.30;
pub const CONCEPT_OVERLAP_WEIGHT: f64 = 0.20;
pub const EMOTIONAL_SIMILARITY_WEIGHT: f64 = 0.20;
pub const EMOTIONAL_WEIGHT_WEIGHT: f64 = 0.20;
pub const RECENCY_WEIGHT: f64 = 0.10;

/// Recency time constant in days.
pub const RECENCY_DAYS: f64 = 30.0;

/// Current conversational context for a retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevanceQuery {
    pub topics: Vec<String>,
    pub emotional_state: EmotionalState,
}

impl RelevanceQuery {
    pub fn new(topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            emotional_state: EmotionalState::neutral(),
        }
    }

    pub fn with_emotional_state(mut self, state: EmotionalState) -> Self {
        self.emotional_state = state;
        self
    }
}

/// Per-term breakdown of a relevance score (unweighted terms).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub topic_overlap: f64,
    pub concept_overlap: f64,
    pub emotional_similarity: f64,
    pub emotional_weight: f64,
    pub recency: f64,
}

impl ScoreBreakdown {
    /// Weighted total in [0, 1].
    pub fn total(&self) -> f64 {
        TOPIC_OVERLAP_WEIGHT * self.topic_overlap
            + CONCEPT_OVERLAP_WEIGHT * self.concept_overlap
            + EMOTIONAL_SIMILARITY_WEIGHT * self.emotional_similarity
            + EMOTIONAL_WEIGHT_WEIGHT * self.emotional_weight
            + RECENCY_WEIGHT * self.recency
    }
}

/// A node with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub node: MemoryNode,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Query normalized once for scoring many candidates.
struct PreparedQuery<'a> {
    topics: HashSet<String>,
    context_tokens: HashSet<String>,
    state: &'a EmotionalState,
}

impl<'a> PreparedQuery<'a> {
    fn new(query: &'a RelevanceQuery) -> Self {
        let topics: HashSet<String> = query
            .topics
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        // Context tokens: each topic plus the concepts inside multi-word topics
        let mut context_tokens = topics.clone();
        for topic in &query.topics {
            context_tokens.extend(extract_concepts(topic));
        }

        Self {
            topics,
            context_tokens,
            state: &query.emotional_state,
        }
    }
}

/// Score one node against a prepared query.
fn score_node(node: &MemoryNode, query: &PreparedQuery<'_>, now: DateTime<Utc>) -> ScoreBreakdown {
    let topic_overlap = if node.topics.is_empty() {
        0.0
    } else {
        node.topics.iter().filter(|t| query.topics.contains(*t)).count() as f64
            / node.topics.len() as f64
    };

    let concept_overlap = if query.context_tokens.is_empty() {
        0.0
    } else {
        let content = content_tokens(&node.content);
        query
            .context_tokens
            .iter()
            .filter(|t| content.contains(t.as_str()))
            .count() as f64
            / query.context_tokens.len() as f64
    };

    ScoreBreakdown {
        topic_overlap,
        concept_overlap,
        emotional_similarity: emotional_similarity(&node.emotional_state, query.state),
        emotional_weight: node.emotional_weight,
        recency: (-node.age_days(now) / RECENCY_DAYS).exp(),
    }
}

/// Every lower-cased word of the content, without length or stop-word filtering.
fn content_tokens(content: &str) -> HashSet<String> {
    content
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deterministic ordering: score desc, `last_accessed_at` desc, id asc.
fn rank_order(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.node.last_accessed_at.cmp(&a.node.last_accessed_at))
        .then_with(|| a.node.id.cmp(&b.node.id))
}

/// Score and order candidates without touching them.
pub fn rank_candidates<'a>(
    candidates: impl IntoIterator<Item = &'a MemoryNode>,
    query: &RelevanceQuery,
    now: DateTime<Utc>,
) -> Vec<ScoredMemory> {
    let prepared = PreparedQuery::new(query);
    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .map(|node| {
            let breakdown = score_node(node, &prepared, now);
            ScoredMemory {
                node: node.clone(),
                score: breakdown.total(),
                breakdown,
            }
        })
        .collect();
    scored.sort_by(rank_order);
    scored
}

impl MemoryStore {
    /// Retrieve up to `limit` nodes most relevant to the current context.
    ///
    /// Returned nodes are refreshed: `access_count` increments by one and
    /// relevance resets to 1.0. Returns an empty vector for unknown owners.
    pub fn retrieve(
        &self,
        owner_id: &str,
        current_topics: &[String],
        current_state: &EmotionalState,
        limit: usize,
    ) -> Result<Vec<MemoryNode>> {
        let query = RelevanceQuery {
            topics: current_topics.to_vec(),
            emotional_state: *current_state,
        };
        Ok(self
            .retrieve_scored(owner_id, &query, limit)?
            .into_iter()
            .map(|s| s.node)
            .collect())
    }

    /// Like [`retrieve`](Self::retrieve) but keeps scores.
    #[instrument(skip(self, query), fields(topics = query.topics.len()))]
    pub fn retrieve_scored(
        &self,
        owner_id: &str,
        query: &RelevanceQuery,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(shard) = self.shard(owner_id)? else {
            return Ok(Vec::new());
        };

        // Score under the read lock so concurrent readers don't block each other
        let now = self.clock().now();
        let selected: Vec<(NodeId, f64, ScoreBreakdown)> = {
            let guard = Self::read_shard(&shard)?;
            let candidates = guard.nodes.values().filter(|n| !guard.is_archived(n));
            rank_candidates(candidates, query, now)
                .into_iter()
                .take(limit)
                .map(|s| (s.node.id, s.score, s.breakdown))
                .collect()
        };

        // Refresh the winners; a node deleted in between is skipped
        let mut guard = Self::write_shard(&shard)?;
        let mut results = Vec::with_capacity(selected.len());
        for (id, score, breakdown) in selected {
            if let Some(node) = guard.nodes.get_mut(&id) {
                node.record_access(now);
                results.push(ScoredMemory {
                    node: node.clone(),
                    score,
                    breakdown,
                });
            }
        }

        debug!(owner = %owner_id, returned = results.len(), "retrieved memories");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::MemoryConfig;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn hints(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryStore::with_clock(MemoryConfig::default(), clock.clone()).unwrap();
        (store, clock)
    }

    #[test]
    fn test_weights_sum_to_one() {
        let all = ScoreBreakdown {
            topic_overlap: 1.0,
            concept_overlap: 1.0,
            emotional_similarity: 1.0,
            emotional_weight: 1.0,
            recency: 1.0,
        };
        assert!((all.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_owner_returns_nothing() {
        let (store, _) = store_with_clock();
        let results = store
            .retrieve("nobody", &hints(&["math"]), &EmotionalState::neutral(), 5)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_topic_match_ranks_first() {
        let (store, _) = store_with_clock();
        let neutral = EmotionalState::neutral();
        let beach = store
            .create_node("A trip to the beach", "alice", "s1", &neutral, &[])
            .unwrap();
        let math = store
            .create_node("Struggling with algebra", "alice", "s1", &neutral, &[])
            .unwrap();

        let results = store
            .retrieve("alice", &hints(&["algebra"]), &neutral, 2)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, math);
        assert_eq!(results[1].id, beach);
    }

    #[test]
    fn test_access_refresh() {
        let (store, clock) = store_with_clock();
        let neutral = EmotionalState::neutral();
        let id = store
            .create_node("Struggling with algebra", "alice", "s1", &neutral, &[])
            .unwrap();
        let other = store
            .create_node("Planning a beach holiday", "alice", "s1", &neutral, &[])
            .unwrap();

        clock.advance(Duration::days(10));
        store.run_maintenance(&CancellationToken::new());
        assert!(store.get(id).unwrap().contextual_relevance < 1.0);

        let results = store
            .retrieve("alice", &hints(&["algebra"]), &neutral, 1)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);

        let refreshed = store.get(id).unwrap();
        assert_eq!(refreshed.contextual_relevance, 1.0);
        assert_eq!(refreshed.access_count, 1);
        assert_eq!(refreshed.last_accessed_at, clock.now());

        // Not returned, not touched
        let untouched = store.get(other).unwrap();
        assert_eq!(untouched.access_count, 0);
        assert!(untouched.contextual_relevance < 1.0);
    }

    #[test]
    fn test_limit_and_tie_break_by_last_access() {
        let (store, clock) = store_with_clock();
        let neutral = EmotionalState::neutral();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(
                store
                    .create_node("", "alice", "s1", &neutral, &hints(&["math"]))
                    .unwrap(),
            );
        }

        // Identical scores; touch ids[3] later so it wins the tie
        clock.advance(Duration::hours(1));
        {
            let shard = store.shard("alice").unwrap().unwrap();
            let mut guard = MemoryStore::write_shard(&shard).unwrap();
            guard.nodes.get_mut(&ids[3]).unwrap().last_accessed_at = clock.now();
        }

        let results = store
            .retrieve("alice", &hints(&["math"]), &neutral, 3)
            .unwrap();
        assert_eq!(results.len(), 3);
        let returned: Vec<NodeId> = results.iter().map(|n| n.id).collect();
        assert_eq!(returned, vec![ids[3], ids[0], ids[1]]);
    }

    #[test]
    fn test_emotional_similarity_contributes() {
        let (store, _) = store_with_clock();
        let happy = EmotionalState {
            joy: 0.6,
            ..Default::default()
        };
        let scared = EmotionalState {
            fear: 0.6,
            ..Default::default()
        };
        let h = store.create_node("", "alice", "s1", &happy, &hints(&["park"])).unwrap();
        let s = store.create_node("", "alice", "s1", &scared, &hints(&["dark"])).unwrap();

        let results = store.retrieve("alice", &[], &happy, 2).unwrap();
        assert_eq!(results[0].id, h);
        assert_eq!(results[1].id, s);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let (store, clock) = store_with_clock();
        let neutral = EmotionalState::neutral();
        for topic in ["math", "chess", "math", "piano", "math"] {
            store.create_node("", "alice", "s1", &neutral, &hints(&[topic])).unwrap();
        }
        let nodes = store.nodes("alice").unwrap();
        let query = RelevanceQuery::new(["math"]);
        let first: Vec<NodeId> = rank_candidates(&nodes, &query, clock.now())
            .iter()
            .map(|s| s.node.id)
            .collect();
        let second: Vec<NodeId> = rank_candidates(&nodes, &query, clock.now())
            .iter()
            .map(|s| s.node.id)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concept_overlap_uses_content() {
        let now = Utc::now();
        let (store, _) = store_with_clock();
        let id = store
            .create_node("my cat knocked the vase over", "alice", "s1", &EmotionalState::neutral(), &[])
            .unwrap();
        let node = store.get(id).unwrap();
        // "cat" is too short to be a topic but still counts as a context token
        let query = RelevanceQuery::new(["cat"]);
        let scored = rank_candidates([&node], &query, now);
        assert_eq!(scored[0].breakdown.topic_overlap, 0.0);
        assert_eq!(scored[0].breakdown.concept_overlap, 1.0);
    }

    #[test]
    fn test_zero_limit() {
        let (store, _) = store_with_clock();
        let id = store
            .create_node("hello world", "alice", "s1", &EmotionalState::neutral(), &[])
            .unwrap();
        assert!(store
            .retrieve("alice", &[], &EmotionalState::neutral(), 0)
            .unwrap()
            .is_empty());
        assert_eq!(store.get(id).unwrap().access_count, 0);
    }
}
