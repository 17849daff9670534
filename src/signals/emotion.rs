//! Emotional-state vectors and the scalar weight derived from them.
//!
//! The classifier that produces these vectors lives outside this crate; the
//! functions here only turn its output into node attributes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Weight of the strongest primary affect in [`emotional_weight`].
const PEAK_WEIGHT: f64 = 0.6;
/// Weight of the mean primary affect in [`emotional_weight`].
const MEAN_WEIGHT: f64 = 0.4;
/// Values at or below this are treated as an inactive affect dimension.
const ACTIVE_EPSILON: f64 = 1e-9;

/// Per-message emotional state as reported by the upstream classifier.
///
/// Every field is expected in `[0, 1]`. Out-of-range or non-finite values are
/// clamped by [`EmotionalState::clamped`] before anything is stored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmotionalState {
    pub joy: f64,
    pub sadness: f64,
    pub anger: f64,
    pub fear: f64,
    pub surprise: f64,
    pub curiosity: f64,
    /// Classifier confidence (meta field, not a primary affect)
    pub confidence: f64,
    /// Growth/learning signal (meta field, not a primary affect)
    pub growth: f64,
}

impl EmotionalState {
    /// Number of primary affect dimensions.
    pub const PRIMARY_COUNT: usize = 6;

    /// A state with every dimension at zero.
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Primary affects in a fixed order.
    pub fn primary_affects(&self) -> [f64; Self::PRIMARY_COUNT] {
        [
            self.joy,
            self.sadness,
            self.anger,
            self.fear,
            self.surprise,
            self.curiosity,
        ]
    }

    /// Copy with every field forced into `[0, 1]`; NaN becomes zero.
    pub fn clamped(&self) -> Self {
        Self {
            joy: clamp_unit(self.joy),
            sadness: clamp_unit(self.sadness),
            anger: clamp_unit(self.anger),
            fear: clamp_unit(self.fear),
            surprise: clamp_unit(self.surprise),
            curiosity: clamp_unit(self.curiosity),
            confidence: clamp_unit(self.confidence),
            growth: clamp_unit(self.growth),
        }
    }

    /// Strict check used by callers that prefer rejection over clamping.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("joy", self.joy),
            ("sadness", self.sadness),
            ("anger", self.anger),
            ("fear", self.fear),
            ("surprise", self.surprise),
            ("curiosity", self.curiosity),
            ("confidence", self.confidence),
            ("growth", self.growth),
        ];
        for (name, value) in fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::invalid_input(format!(
                    "emotional field {} = {} is outside [0, 1]",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Field-wise mean of several states. Returns the neutral state for an empty input.
    pub fn mean<'a>(states: impl IntoIterator<Item = &'a EmotionalState>) -> Self {
        let mut sum = Self::neutral();
        let mut count = 0usize;
        for s in states {
            sum.joy += s.joy;
            sum.sadness += s.sadness;
            sum.anger += s.anger;
            sum.fear += s.fear;
            sum.surprise += s.surprise;
            sum.curiosity += s.curiosity;
            sum.confidence += s.confidence;
            sum.growth += s.growth;
            count += 1;
        }
        if count == 0 {
            return sum;
        }
        let n = count as f64;
        Self {
            joy: sum.joy / n,
            sadness: sum.sadness / n,
            anger: sum.anger / n,
            fear: sum.fear / n,
            surprise: sum.surprise / n,
            curiosity: sum.curiosity / n,
            confidence: sum.confidence / n,
            growth: sum.growth / n,
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Significance weight of a state: `0.6 * max + 0.4 * mean` over primary affects.
///
/// Input is clamped first, so the result is always in `[0, 1]`.
pub fn emotional_weight(state: &EmotionalState) -> f64 {
    let affects = state.clamped().primary_affects();
    let peak = affects.iter().copied().fold(0.0_f64, f64::max);
    let mean = affects.iter().sum::<f64>() / affects.len() as f64;
    (PEAK_WEIGHT * peak + MEAN_WEIGHT * mean).clamp(0.0, 1.0)
}

/// Similarity of two states: mean of `1 - |a - b|` over the primary affect
/// dimensions active in either state.
///
/// Two states with no active dimension carry no emotional signal and score 0.
pub fn emotional_similarity(a: &EmotionalState, b: &EmotionalState) -> f64 {
    let a = a.clamped().primary_affects();
    let b = b.clamped().primary_affects();

    let mut total = 0.0;
    let mut shared = 0usize;
    for (x, y) in a.iter().zip(b.iter()) {
        if *x > ACTIVE_EPSILON || *y > ACTIVE_EPSILON {
            total += 1.0 - (x - y).abs();
            shared += 1;
        }
    }

    if shared == 0 {
        0.0
    } else {
        total / shared as f64
    }
}
