//! Context-window pruning.
//!
//! [`prune`] drops the oldest non-anchor turns of a request until its
//! estimated token cost fits the budget.  The turn at index 0 (the persona /
//! system instruction) is never removed, and at least
//! [`MIN_RETAINED_TURNS`] turns are always kept; if those alone exceed the
//! budget the caller decides what to do about it.
//!
//! The cost of a turn comes from a [`TokenEstimator`].  The default,
//! [`CharRatioEstimator`], is a character-count heuristic; any closure
//! `Fn(&str) -> usize` (for example a real tokenizer) can be used instead.

use super::ConversationTurn;

/// Pruning never shrinks a request below this many turns.
pub const MIN_RETAINED_TURNS: usize = 2;

// ---------------------------------------------------------------------------
// TokenEstimator
// ---------------------------------------------------------------------------

/// Estimates how many model tokens a piece of text costs.
pub trait TokenEstimator {
    fn estimate(&self, text: &str) -> usize;
}

impl<F> TokenEstimator for F
where
    F: Fn(&str) -> usize,
{
    fn estimate(&self, text: &str) -> usize {
        self(text)
    }
}

/// Cost proportional to the number of characters (`chars × ratio`, rounded
/// down).
///
/// A ratio of `2.0` deliberately over-estimates for CJK-heavy text, where a
/// single character frequently maps to more than one token.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    tokens_per_char: f32,
}

impl CharRatioEstimator {
    pub fn new(tokens_per_char: f32) -> Self {
        Self {
            tokens_per_char: tokens_per_char.max(0.0),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(2.0)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        (text.chars().count() as f32 * self.tokens_per_char) as usize
    }
}

// ---------------------------------------------------------------------------
// prune
// ---------------------------------------------------------------------------

/// Return `history` with turns removed from index 1 onwards until the summed
/// estimated cost is ≤ `budget` or only [`MIN_RETAINED_TURNS`] remain.
///
/// Pure and deterministic.  Histories of one turn or fewer are returned
/// unchanged.
pub fn prune<E>(history: &[ConversationTurn], budget: usize, estimator: &E) -> Vec<ConversationTurn>
where
    E: TokenEstimator + ?Sized,
{
    if history.len() <= MIN_RETAINED_TURNS {
        return history.to_vec();
    }

    let costs: Vec<usize> = history
        .iter()
        .map(|turn| estimator.estimate(turn.content()))
        .collect();
    let mut total: usize = costs.iter().sum();

    // Turns 1..=dropped are evicted, oldest first.
    let mut dropped = 0;
    while total > budget && history.len() - dropped > MIN_RETAINED_TURNS {
        total -= costs[1 + dropped];
        dropped += 1;
    }

    if dropped > 0 {
        log::debug!(
            "prune: dropped {dropped} turn(s), estimated cost now {total} / {budget}"
        );
    }

    let mut pruned = Vec::with_capacity(history.len() - dropped);
    pruned.push(history[0].clone());
    pruned.extend_from_slice(&history[1 + dropped..]);
    pruned
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
