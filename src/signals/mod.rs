//! Pure per-message signals turned into node attributes at creation time.
//!
//! - [`emotional_weight`]: emotional-state vector to a significance weight
//! - [`emotional_similarity`]: affect-space similarity of two states
//! - [`extract_concepts`]: free text to ordered topic tokens

mod concepts;
mod emotion;

pub use concepts::{extract_concepts, ConceptExtractor, MAX_CONCEPTS, MIN_TOKEN_CHARS, STOP_WORDS};
pub use emotion::{emotional_similarity, emotional_weight, EmotionalState};
