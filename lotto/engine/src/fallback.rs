use std::collections::BTreeSet;

use rand::Rng;

/// `k` distinct uniform numbers from `1..=universe`, ascending.
///
/// `k` is capped at `universe`, so the draw loop always terminates.
pub fn random_pick_with<R: Rng + ?Sized>(k: usize, universe: u32, rng: &mut R) -> Vec<u32> {
    if universe == 0 {
        return Vec::new();
    }
    let target = k.min(universe as usize);
    let mut picked = BTreeSet::new();
    while picked.len() < target {
        picked.insert(rng.gen_range(1..=universe));
    }
    picked.into_iter().collect()
}

/// [`random_pick_with`] using the thread-local RNG.
#[must_use]
pub fn random_pick(k: usize, universe: u32) -> Vec<u32> {
    random_pick_with(k, universe, &mut rand::thread_rng())
}
