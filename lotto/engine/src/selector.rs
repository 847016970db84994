use std::cmp::Ordering;

use crate::{config::PICK_COUNT, error::EngineError, scorer::ScoreVector};

/// Candidate number paired with its blended probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedNumber {
    /// Lotto number, 1-based.
    pub number: u32,
    /// Blended probability.
    pub probability: f32,
}

/// Highest probability first; equal probabilities fall back to the lower number.
fn by_rank(a: &RankedNumber, b: &RankedNumber) -> Ordering {
    b.probability
        .total_cmp(&a.probability)
        .then_with(|| a.number.cmp(&b.number))
}

/// Every candidate in rank order.
#[must_use]
pub fn rank(blended: &ScoreVector) -> Vec<RankedNumber> {
    let mut ranked: Vec<RankedNumber> = blended
        .as_slice()
        .iter()
        .enumerate()
        .map(|(idx, probability)| RankedNumber {
            number: u32::try_from(idx + 1).unwrap_or(u32::MAX),
            probability: *probability,
        })
        .collect();
    ranked.sort_by(by_rank);
    ranked
}

/// Picks the `k` most probable numbers and returns them in ascending order.
pub fn select_top_k(blended: &ScoreVector, k: usize) -> Result<Vec<u32>, EngineError> {
    if k > blended.len() {
        return Err(EngineError::DimensionMismatch {
            expected: k,
            actual: blended.len(),
        });
    }
    let mut numbers: Vec<u32> = rank(blended)
        .into_iter()
        .take(k)
        .map(|ranked| ranked.number)
        .collect();
    numbers.sort_unstable();
    Ok(numbers)
}

/// [`select_top_k`] with the standard pick size.
pub fn select_pick(blended: &ScoreVector) -> Result<Vec<u32>, EngineError> {
    select_top_k(blended, PICK_COUNT)
}
