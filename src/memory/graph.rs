//! Connection graph maintenance.
//!
//! Links are stored on both endpoints and only ever added or removed in
//! pairs, so `A.connections` contains `B` exactly when `B.connections`
//! contains `A`.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::signals::{emotional_similarity, EmotionalState};

use super::shard::OwnerShard;
use super::types::{Connection, NodeId};

/// Emotional similarity above which two nodes link without a shared topic.
pub const EMOTIONAL_LINK_THRESHOLD: f64 = 0.7;

/// Jaccard overlap of two topic lists.
pub fn topic_jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Number of topics two lists have in common.
pub fn shared_topics(a: &[String], b: &[String]) -> usize {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    b.iter().filter(|t| a.contains(t.as_str())).count()
}

/// Link score between two nodes, or `None` if they should not link.
///
/// Nodes qualify with at least one shared topic or an emotional similarity
/// above [`EMOTIONAL_LINK_THRESHOLD`]. Qualifying pairs are ranked by the mean
/// of topic Jaccard overlap and emotional similarity.
pub fn link_score(
    topics_a: &[String],
    state_a: &EmotionalState,
    topics_b: &[String],
    state_b: &EmotionalState,
) -> Option<f64> {
    let emotional = emotional_similarity(state_a, state_b);
    if shared_topics(topics_a, topics_b) == 0 && emotional <= EMOTIONAL_LINK_THRESHOLD {
        return None;
    }
    Some(0.5 * topic_jaccard(topics_a, topics_b) + 0.5 * emotional)
}

/// Order links weakest first: lower score, then older link, then older peer.
fn weaker(a: (f64, DateTime<Utc>, NodeId), b: (f64, DateTime<Utc>, NodeId)) -> Ordering {
    a.0.total_cmp(&b.0)
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(&b.2))
}

impl OwnerShard {
    /// Link a freshly inserted node to related recent nodes.
    ///
    /// Scans at most `scan_window` nodes created before `id`, picks the best
    /// `max_connections` candidates, and links each one unless that would push
    /// the candidate over the cap with the new link being its weakest.
    /// Returns the number of links created.
    pub(crate) fn link_new_node(
        &mut self,
        id: NodeId,
        scan_window: usize,
        max_connections: usize,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(node) = self.nodes.get(&id) else {
            return 0;
        };
        let topics = node.topics.clone();
        let state = node.emotional_state;

        let mut candidates: Vec<(f64, NodeId)> = self
            .nodes
            .range(..id)
            .rev()
            .take(scan_window)
            .filter_map(|(cid, c)| {
                link_score(&topics, &state, &c.topics, &c.emotional_state).map(|s| (s, *cid))
            })
            .collect();

        // Best score first; more recent node first among equals
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut linked = 0;
        for (score, candidate) in candidates {
            if linked >= max_connections {
                break;
            }
            if self.connect(id, candidate, score, max_connections, now) {
                linked += 1;
            }
        }

        debug!(node = %id, linked, "linked new node");
        linked
    }

    /// Link `new` to `existing`, evicting `existing`'s weakest link if it is
    /// at the cap. Returns false when the new link would itself be the weakest.
    fn connect(
        &mut self,
        new: NodeId,
        existing: NodeId,
        score: f64,
        max_connections: usize,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(target) = self.nodes.get(&existing) else {
            return false;
        };

        if target.connections.len() >= max_connections {
            let weakest = target
                .connections
                .iter()
                .map(|(peer, c)| (c.score, c.linked_at, *peer))
                .min_by(|a, b| weaker(*a, *b));

            if let Some(weakest) = weakest {
                if weaker((score, now, new), weakest) == Ordering::Less {
                    return false;
                }
                self.disconnect(existing, weakest.2);
            }
        }

        let link = Connection {
            score,
            linked_at: now,
        };
        for (from, to) in [(new, existing), (existing, new)] {
            if let Some(node) = self.nodes.get_mut(&from) {
                node.connections.insert(to, link);
                node.refresh_connection_strength();
            }
        }
        true
    }

    /// Remove the link between two nodes on both sides.
    pub(crate) fn disconnect(&mut self, a: NodeId, b: NodeId) {
        for (from, to) in [(a, b), (b, a)] {
            if let Some(node) = self.nodes.get_mut(&from) {
                node.connections.remove(&to);
                node.refresh_connection_strength();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_jaccard() {
        let a = topics(&["math", "algebra"]);
        let b = topics(&["math", "geometry"]);
        assert!((topic_jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(topic_jaccard(&[], &[]), 0.0);
        assert_eq!(shared_topics(&a, &b), 1);
    }

    #[test]
    fn test_shared_topic_qualifies() {
        let neutral = EmotionalState::neutral();
        let score = link_score(
            &topics(&["math", "algebra"]),
            &neutral,
            &topics(&["math", "geometry"]),
            &neutral,
        );
        assert!(score.is_some());
    }

    #[test]
    fn test_emotional_similarity_qualifies() {
        let a = EmotionalState {
            joy: 0.9,
            ..Default::default()
        };
        let b = EmotionalState {
            joy: 0.85,
            ..Default::default()
        };
        assert!(link_score(&topics(&["beach"]), &a, &topics(&["exam"]), &b).is_some());

        let c = EmotionalState {
            fear: 0.9,
            ..Default::default()
        };
        assert!(link_score(&topics(&["beach"]), &a, &topics(&["exam"]), &c).is_none());
    }

    #[test]
    fn test_unrelated_does_not_qualify() {
        let neutral = EmotionalState::neutral();
        assert!(link_score(&topics(&["beach"]), &neutral, &topics(&["exam"]), &neutral).is_none());
    }
}
