//! Concept extraction: free text to a short, ordered list of topic tokens.
//!
//! This is plain lexical filtering. Synonyms are not merged and no stemming is
//! applied, so "learn" and "learning" are different concepts.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Maximum number of concepts returned for one text.
pub const MAX_CONCEPTS: usize = 10;

/// Tokens must be longer than this many characters.
pub const MIN_TOKEN_CHARS: usize = 3;

/// Words dropped before concept selection.
pub const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "because", "been", "before", "being",
    "below", "between", "both", "could", "does", "doing", "down", "during", "each", "even",
    "every", "from", "further", "have", "having", "here", "into", "just", "like", "more", "most",
    "much", "must", "only", "other", "over", "really", "same", "should", "some", "such", "than",
    "that", "their", "theirs", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "until", "very", "want", "were", "what", "when", "where", "which",
    "while", "will", "with", "would", "your", "yours", "yourself",
];

/// Deterministic lexical concept extractor.
pub struct ConceptExtractor {
    word_re: Regex,
    stop_words: HashSet<&'static str>,
    max_concepts: usize,
}

impl ConceptExtractor {
    /// Create an extractor with the built-in stop-word list.
    pub fn new() -> Self {
        Self::with_stop_words(STOP_WORDS)
    }

    /// Create an extractor with a custom stop-word list.
    pub fn with_stop_words(stop_words: &[&'static str]) -> Self {
        Self {
            // Runs of letters, digits and apostrophes (keeps "don't" together)
            word_re: Regex::new(r"[\p{L}\p{N}']+").expect("word pattern is a valid regex"),
            stop_words: stop_words.iter().copied().collect(),
            max_concepts: MAX_CONCEPTS,
        }
    }

    /// Override the number of concepts kept.
    pub fn with_max_concepts(mut self, max: usize) -> Self {
        self.max_concepts = max;
        self
    }

    /// Extract up to `max_concepts` lower-cased tokens, first occurrence order,
    /// no duplicates.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut seen = HashSet::new();
        let mut concepts = Vec::new();

        for m in self.word_re.find_iter(&lower) {
            let token = m.as_str().trim_matches('\'');
            if token.chars().count() <= MIN_TOKEN_CHARS || self.stop_words.contains(token) {
                continue;
            }
            if seen.insert(token.to_string()) {
                concepts.push(token.to_string());
                if concepts.len() >= self.max_concepts {
                    break;
                }
            }
        }

        concepts
    }
}

impl Default for ConceptExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract concepts with the shared default extractor.
pub fn extract_concepts(text: &str) -> Vec<String> {
    static EXTRACTOR: OnceLock<ConceptExtractor> = OnceLock::new();
    EXTRACTOR.get_or_init(ConceptExtractor::new).extract(text)
}
