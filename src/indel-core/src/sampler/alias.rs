//! Vose's alias method: O(k) construction, O(1) draw from a fixed
//! categorical distribution. Used for rate-category assignment and for any
//! other fixed-weight choice (e.g. picking an indel type) that doesn't
//! change once the engine is built.

use rand::Rng;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct AliasSampler {
    prob: Vec<f64>,
    alias: Vec<usize>,
}

impl AliasSampler {
    /// Build from a distribution over `0..weights.len()` that sums to ~1.0.
    /// Does not renormalize silently: a distribution that drifts from 1.0 by
    /// more than `1e-6` is a caller bug, not something to paper over.
    pub fn new(weights: &[f64]) -> Result<Self, ConfigError> {
        let k = weights.len();
        if k == 0 {
            return Err(ConfigError::EmptyDistribution);
        }
        let mut sum = 0.0;
        for (index, &value) in weights.iter().enumerate() {
            if value < 0.0 {
                return Err(ConfigError::NegativeWeight { index, value });
            }
            sum += value;
        }
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::WeightsDontSumToOne { sum });
        }

        let mut scaled: Vec<f64> = weights.iter().map(|w| w * k as f64).collect();
        let mut small: Vec<usize> = Vec::new();
        let mut large: Vec<usize> = Vec::new();
        for (i, &p) in scaled.iter().enumerate() {
            if p < 1.0 {
                small.push(i);
            } else {
                large.push(i);
            }
        }

        let mut prob = vec![0.0; k];
        let mut alias = vec![0usize; k];

        while let (Some(s), Some(l)) = (small.pop(), large.pop()) {
            prob[s] = scaled[s];
            alias[s] = l;
            scaled[l] = (scaled[l] + scaled[s]) - 1.0;
            if scaled[l] < 1.0 {
                small.push(l);
            } else {
                large.push(l);
            }
        }
        // Leftover entries are numerically ~1.0 due to floating point drift;
        // they keep their own probability mass and no alias.
        for i in large {
            prob[i] = 1.0;
        }
        for i in small {
            prob[i] = 1.0;
        }

        Ok(Self { prob, alias })
    }

    pub fn len(&self) -> usize {
        self.prob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prob.is_empty()
    }

    pub fn draw(&self, rng: &mut impl Rng) -> usize {
        let i = rng.gen_range(0..self.prob.len());
        let coin: f64 = rng.gen_range(0.0..1.0);
        if coin < self.prob[i] {
            i
        } else {
            self.alias[i]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn rejects_empty() {
        assert_eq!(AliasSampler::new(&[]), Err(ConfigError::EmptyDistribution));
    }

    #[test]
    fn rejects_negative_weight() {
        assert_eq!(
            AliasSampler::new(&[0.5, -0.5, 1.0]),
            Err(ConfigError::NegativeWeight { index: 1, value: -0.5 })
        );
    }

    #[test]
    fn rejects_non_normalized() {
        assert!(matches!(
            AliasSampler::new(&[0.5, 0.2]),
            Err(ConfigError::WeightsDontSumToOne { .. })
        ));
    }

    #[test]
    fn empirical_frequencies_match_weights() {
        let weights = [0.1, 0.6, 0.05, 0.25];
        let sampler = AliasSampler::new(&weights).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut counts = [0u32; 4];
        let trials = 200_000;
        for _ in 0..trials {
            counts[sampler.draw(&mut rng)] += 1;
        }
        for (i, &w) in weights.iter().enumerate() {
            let observed = counts[i] as f64 / trials as f64;
            assert!((observed - w).abs() < 0.01, "category {i}: {observed} vs {w}");
        }
    }

    #[test]
    fn single_category_always_returns_zero() {
        let sampler = AliasSampler::new(&[1.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(sampler.draw(&mut rng), 0);
        }
    }
}
