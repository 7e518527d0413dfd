//! A single block: a run of `length` original-sequence positions followed
//! by `insertion` freshly-inserted positions, keyed by its starting
//! position in the *parent* sequence's coordinate space. Optionally carries
//! a rate category per position, when the engine is tracking per-site rate
//! heterogeneity.

use rand::Rng;

use crate::sampler::CategoryPathSampler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub length: u64,
    pub insertion: u64,
    pub rate_categories: Option<Vec<usize>>,
}

impl Block {
    pub fn new(length: u64, insertion: u64) -> Self {
        Self { length, insertion, rate_categories: None }
    }

    pub fn total_length(&self) -> u64 {
        self.length + self.insertion
    }

    /// Assign rate categories to `insert_length` newly inserted positions at
    /// `position` within this block's own rate-category vector. The first
    /// call on a block lazily seeds a sentinel anchor entry (`usize::MAX`)
    /// standing in for the original-sequence positions that never got one.
    pub fn handle_insertion(
        &mut self,
        position: usize,
        insert_length: u64,
        sampler: &CategoryPathSampler,
        rng: &mut impl Rng,
    ) {
        let rates = self.rate_categories.get_or_insert_with(Vec::new);
        if rates.is_empty() {
            rates.push(usize::MAX);
            for _ in 0..insert_length {
                rates.push(sampler.next(0, rng));
            }
            return;
        }

        let left_flank = rates[position];
        let new_rates = if position == 0 {
            let right_flank = rates[position + 1];
            sampler.right_bridge(right_flank, insert_length, rng)
        } else if position == rates.len() - 1 {
            sampler.left_bridge(left_flank, insert_length, rng)
        } else {
            let right_flank = rates[position + 1];
            sampler.bridge(left_flank, right_flank, insert_length, rng)
        };
        rates.splice(position + 1..position + 1, new_rates);
    }
}
