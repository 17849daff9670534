//! Fixed rule table mapping a new node's topics and weight to its kind.

use super::types::MemoryKind;

/// Weight above which growth topics mark a node as wisdom.
const WISDOM_WEIGHT: f64 = 0.8;

const GROWTH_TOPICS: &[&str] = &[
    "learn", "learned", "learning", "lesson", "lessons", "realize", "realized", "realise",
    "realised", "understand", "understood", "insight", "growth", "grow", "grew", "improve",
    "improved", "progress", "changed",
];

const RELATIONSHIP_TOPICS: &[&str] = &[
    "thanks", "thank", "thankful", "grateful", "gratitude", "appreciate", "appreciated", "help",
    "helped", "helping", "helpful", "friend", "friends", "together", "trust",
];

const PATTERN_TOPICS: &[&str] = &[
    "always", "usually", "often", "habit", "habits", "routine", "tend", "tends", "pattern",
    "keep", "keeps", "daily", "weekly", "whenever",
];

const KNOWLEDGE_TOPICS: &[&str] = &[
    "fact", "facts", "know", "knowledge", "definition", "define", "explain", "explains",
    "explained", "theory", "formula", "information", "study", "studying", "research",
];

/// Rule table evaluated in order after the wisdom check; first match wins.
const KIND_RULES: &[(MemoryKind, &[&str])] = &[
    (MemoryKind::Relationship, RELATIONSHIP_TOPICS),
    (MemoryKind::Pattern, PATTERN_TOPICS),
    (MemoryKind::Knowledge, KNOWLEDGE_TOPICS),
];

/// Classify a node from its topics and emotional weight.
pub fn classify(topics: &[String], emotional_weight: f64) -> MemoryKind {
    if emotional_weight > WISDOM_WEIGHT && matches_any(topics, GROWTH_TOPICS) {
        return MemoryKind::Wisdom;
    }

    KIND_RULES
        .iter()
        .find(|(_, keywords)| matches_any(topics, keywords))
        .map(|(kind, _)| *kind)
        .unwrap_or(MemoryKind::Experience)
}

fn matches_any(topics: &[String], keywords: &[&str]) -> bool {
    topics.iter().any(|t| keywords.contains(&t.as_str()))
}
