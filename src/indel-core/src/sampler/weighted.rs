//! Level-bucketed dynamic weighted sampler, used by the Gillespie
//! substitution engine to pick the next site to mutate. Weights change
//! every accepted event, so unlike [`super::alias::AliasSampler`] this
//! structure supports O(1)-amortized insert/remove/update, trading exact
//! O(1) draw for a rejection loop whose expected iteration count is
//! bounded by the ratio between a weight and its bucket's upper bound.
//!
//! Bucket assignment: `level(w) = floor(log2(w))`, with interior sites of
//! weight `0.0` (a site whose site-rate has gone to zero, e.g. all of its
//! competing substitution rates vanished) parked in a dedicated zero level
//! that is present in the index but never contributes sampling mass.

use std::collections::HashMap;

use rand::Rng;

use crate::error::{ConfigError, RangeError};

const ZERO_LEVEL: i32 = i32::MIN;

fn level_of(weight: f64) -> i32 {
    if weight == 0.0 {
        return ZERO_LEVEL;
    }
    let base = weight.log2().floor() as i32;
    if weight >= 1.0 {
        base + 1
    } else {
        base
    }
}

fn upper_bound(level: i32) -> f64 {
    if level == ZERO_LEVEL {
        0.0
    } else if level > 0 {
        // `level_of` offsets `w >= 1.0` levels by one, so level `l` here
        // already means `w` in `[2^(l-1), 2^l)` — the bound is `2^l`, not
        // `2^(l+1)`.
        2f64.powi(level)
    } else {
        2f64.powi(level + 1)
    }
}

#[derive(Debug, Default)]
pub struct WeightedSampler {
    weight: Vec<f64>,
    level: Vec<i32>,
    /// For each live index, its position inside `buckets[level]`, so removal
    /// can swap-pop instead of scanning.
    slot: Vec<usize>,
    buckets: HashMap<i32, Vec<usize>>,
}

impl WeightedSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.weight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }

    /// Insert a new weight, returning the index it can later be referenced
    /// by in [`Self::update_weight`] / [`Self::remove`].
    pub fn insert(&mut self, weight: f64) -> Result<usize, ConfigError> {
        if weight < 0.0 {
            return Err(ConfigError::NegativeWeight { index: self.weight.len(), value: weight });
        }
        let index = self.weight.len();
        let level = level_of(weight);
        let bucket = self.buckets.entry(level).or_default();
        self.slot.push(bucket.len());
        bucket.push(index);
        self.weight.push(weight);
        self.level.push(level);
        Ok(index)
    }

    pub fn weight_of(&self, index: usize) -> Result<f64, RangeError> {
        self.weight.get(index).copied().ok_or(RangeError::UnknownIndex { index })
    }

    pub fn update_weight(&mut self, index: usize, new_weight: f64) -> Result<(), RangeError> {
        if index >= self.weight.len() {
            return Err(RangeError::UnknownIndex { index });
        }
        let new_level = level_of(new_weight);
        let old_level = self.level[index];
        if new_level != old_level {
            self.remove_from_bucket(index, old_level);
            let bucket = self.buckets.entry(new_level).or_default();
            self.slot[index] = bucket.len();
            bucket.push(index);
            self.level[index] = new_level;
        }
        self.weight[index] = new_weight;
        Ok(())
    }

    fn remove_from_bucket(&mut self, index: usize, level: i32) {
        let bucket = self.buckets.get_mut(&level).expect("level bucket must exist for a tracked index");
        let pos = self.slot[index];
        let last = bucket.len() - 1;
        bucket.swap(pos, last);
        bucket.pop();
        if pos < bucket.len() {
            self.slot[bucket[pos]] = pos;
        }
    }

    /// Draw an index proportional to its current weight. Panics if the
    /// sampler is empty or every tracked weight is zero.
    pub fn draw(&self, rng: &mut impl Rng) -> usize {
        let levels: Vec<(i32, f64)> = self
            .buckets
            .iter()
            .filter(|(_, indices)| !indices.is_empty())
            .map(|(&level, indices)| (level, indices.len() as f64 * upper_bound(level)))
            .collect();
        let total: f64 = levels.iter().map(|(_, mass)| *mass).sum();
        assert!(total > 0.0, "weighted sampler has no positive-weight entries to draw from");

        loop {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen_level = levels[0].0;
            for &(level, mass) in &levels {
                if target < mass {
                    chosen_level = level;
                    break;
                }
                target -= mass;
            }
            let bucket = &self.buckets[&chosen_level];
            let candidate = bucket[rng.gen_range(0..bucket.len())];
            let bound = upper_bound(chosen_level);
            let coin: f64 = rng.gen_range(0.0..bound);
            if coin < self.weight[candidate] {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn zero_weight_never_drawn() {
        let mut sampler = WeightedSampler::new();
        let zero = sampler.insert(0.0).unwrap();
        let one = sampler.insert(1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..1000 {
            assert_eq!(sampler.draw(&mut rng), one);
        }
        assert_eq!(sampler.weight_of(zero).unwrap(), 0.0);
    }

    #[test]
    fn empirical_ratio_matches_weights() {
        let mut sampler = WeightedSampler::new();
        let a = sampler.insert(1.0).unwrap();
        let b = sampler.insert(3.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut counts = HashMap::new();
        let trials = 100_000;
        for _ in 0..trials {
            *counts.entry(sampler.draw(&mut rng)).or_insert(0u32) += 1;
        }
        let ratio = f64::from(counts[&b]) / f64::from(counts[&a]);
        assert!((ratio - 3.0).abs() < 0.2, "ratio {ratio}");
    }

    #[test]
    fn update_then_remove_from_bucket_is_consistent() {
        let mut sampler = WeightedSampler::new();
        let a = sampler.insert(2.0).unwrap();
        let _b = sampler.insert(0.5).unwrap();
        sampler.update_weight(a, 100.0).unwrap();
        assert_eq!(sampler.weight_of(a).unwrap(), 100.0);
        assert_eq!(sampler.update_weight(99, 1.0), Err(RangeError::UnknownIndex { index: 99 }));
    }
}
