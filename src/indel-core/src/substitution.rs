//! Substitution engine (C9): draws a root sequence from the model's
//! stationary distribution, then walks the tree depth-first mutating a
//! single shared sequence buffer in place, undoing each branch's changes
//! via a delta log on recursion unwind instead of cloning the sequence at
//! every node.
//!
//! Combines two mutation strategies ported from the reference's
//! `SubstitutionSimulator.h::mutateEntireSeq` (full sweep, one `P(t)` row
//! sampled per site) and `SubstitutionsGillespie.h` (Gillespie, a single
//! site sampled per waiting time from a dynamic weighted sampler). The
//! choice between them is a branch-length threshold, not hardcoded.

use std::collections::HashMap;

use model::{NodeId, ReplacementModel, Tree};
use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::error::ConfigError;
use crate::sampler::{AliasSampler, WeightedSampler};

/// Per-branch cache of `P(i -> ., t)` rows, built lazily so only the
/// `(category, origin)` pairs actually visited pay for an alias sampler.
struct BranchTransitionProbabilities<'m> {
    model: &'m dyn ReplacementModel,
    branch_length: f64,
    rows: HashMap<(usize, usize), AliasSampler>,
}

impl<'m> BranchTransitionProbabilities<'m> {
    fn new(model: &'m dyn ReplacementModel, branch_length: f64) -> Self {
        Self { model, branch_length, rows: HashMap::new() }
    }

    fn row(&mut self, category: usize, origin: usize) -> Result<&AliasSampler, ConfigError> {
        if !self.rows.contains_key(&(category, origin)) {
            let n = self.model.alphabet_size();
            let weights: Vec<f64> = (0..n).map(|j| self.model.p(origin, j, category, self.branch_length)).collect();
            let sampler = AliasSampler::new(&weights)?;
            self.rows.insert((category, origin), sampler);
        }
        Ok(self.rows.get(&(category, origin)).expect("just inserted"))
    }
}

pub struct SubstitutionEngine<'m> {
    model: &'m dyn ReplacementModel,
    gillespie_threshold: f64,
    /// One alias sampler per origin character, built once from that
    /// character's normalized off-diagonal `Q` row (self-transition
    /// excluded): which character a Gillespie event mutates *to*.
    character_samplers: Vec<AliasSampler>,
    /// Alias sampler over the model's stationary frequencies, shared by
    /// [`Self::draw_root_sequence`] and by newly inserted columns (drawn
    /// "at equilibrium", matching the root sequence's own draw).
    stationary_sampler: AliasSampler,
    min_weight: f64,
    max_weight: f64,
}

impl<'m> SubstitutionEngine<'m> {
    pub fn new(model: &'m dyn ReplacementModel, gillespie_threshold: f64) -> Result<Self, ConfigError> {
        if !gillespie_threshold.is_finite() || gillespie_threshold < 0.0 {
            return Err(ConfigError::InvalidGillespieThreshold { value: gillespie_threshold });
        }
        let n = model.alphabet_size();
        let mut character_samplers = Vec::with_capacity(n);
        for i in 0..n {
            let sum = -model.q(i, i);
            let normalizer = if sum > 0.0 { 1.0 / sum } else { 0.0 };
            let weights: Vec<f64> = (0..n).map(|j| if i == j { 0.0 } else { model.q(i, j) * normalizer }).collect();
            character_samplers.push(AliasSampler::new(&weights)?);
        }

        let mut min_qii = f64::MAX;
        let mut max_qii = 0.0;
        for i in 0..n {
            let qii = -model.q(i, i);
            min_qii = min_qii.min(qii);
            max_qii = max_qii.max(qii);
        }
        let mut min_rate = f64::MAX;
        let mut max_rate = 0.0;
        for c in 0..model.num_categories() {
            let rate = model.rate(c);
            min_rate = min_rate.min(rate);
            max_rate = max_rate.max(rate);
        }

        let freq: Vec<f64> = (0..n).map(|i| model.freq(i)).collect();
        let stationary_sampler = AliasSampler::new(&freq)?;

        Ok(Self {
            model,
            gillespie_threshold,
            character_samplers,
            stationary_sampler,
            min_weight: (min_rate * min_qii) / 2.0,
            max_weight: (max_rate * max_qii) * 2.0,
        })
    }

    /// Draw a single character from the model's stationary distribution,
    /// used both for the root sequence and for any column an indel event
    /// inserts later (it never existed under an ancestor, so there is no
    /// parent character to inherit).
    pub(crate) fn draw_stationary(&self, rng: &mut impl Rng) -> usize {
        self.stationary_sampler.draw(rng)
    }

    /// Draw a root sequence of `length` characters, i.i.d. from the
    /// model's stationary distribution.
    pub fn draw_root_sequence(&self, length: usize, rng: &mut impl Rng) -> Result<Vec<usize>, ConfigError> {
        Ok((0..length).map(|_| self.draw_stationary(rng)).collect())
    }

    /// Walk `tree` depth-first from the root, mutating `root_sequence`
    /// along every branch and recording every node's resulting sequence
    /// (the root's own entry is the unmutated input). `rate_categories`
    /// assigns one category index to each site and is shared by every
    /// node — callers draw it once, either from a [`crate::sampler::category::CategoryPathSampler`]
    /// chain (no indel coupling) or from the indel layer's per-column
    /// category map (indel-aware coupling).
    pub fn simulate<T: Tree>(
        &self,
        tree: &T,
        root_sequence: Vec<usize>,
        rate_categories: &[usize],
        rng: &mut impl Rng,
    ) -> Result<HashMap<NodeId, Vec<usize>>, ConfigError> {
        let mut current = root_sequence;
        let mut outputs = HashMap::new();
        outputs.insert(tree.root(), current.clone());
        self.walk(tree, tree.root(), &mut current, rate_categories, &mut outputs, rng)?;
        Ok(outputs)
    }

    fn walk<T: Tree>(
        &self,
        tree: &T,
        node: NodeId,
        current: &mut [usize],
        rate_categories: &[usize],
        outputs: &mut HashMap<NodeId, Vec<usize>>,
        rng: &mut impl Rng,
    ) -> Result<(), ConfigError> {
        for &child in tree.children(node) {
            let branch_length = tree.branch_length(child);
            let mut delta_log = Vec::new();
            self.mutate_branch(current, branch_length, rate_categories, &mut delta_log, rng)?;
            outputs.insert(child, current.to_vec());
            self.walk(tree, child, current, rate_categories, outputs, rng)?;
            for (site, old_char) in delta_log.into_iter().rev() {
                current[site] = old_char;
            }
        }
        Ok(())
    }

    /// Mutate `current` along a single branch of length `branch_length`,
    /// picking the full-sweep or Gillespie strategy by the same threshold
    /// used everywhere else in the engine. Exposed so callers that need to
    /// mutate an owned, variable-length buffer directly (sequences whose
    /// length changed along the branch due to indels) don't have to
    /// duplicate the threshold check.
    pub(crate) fn mutate_branch(
        &self,
        current: &mut [usize],
        branch_length: f64,
        rate_categories: &[usize],
        delta_log: &mut Vec<(usize, usize)>,
        rng: &mut impl Rng,
    ) -> Result<(), ConfigError> {
        if branch_length <= self.gillespie_threshold {
            self.mutate_branch_gillespie(current, branch_length, rate_categories, delta_log, rng)
        } else {
            self.mutate_branch_full_sweep(current, branch_length, rate_categories, delta_log, rng)
        }
    }

    pub(crate) fn mutate_branch_full_sweep(
        &self,
        current: &mut [usize],
        branch_length: f64,
        rate_categories: &[usize],
        delta_log: &mut Vec<(usize, usize)>,
        rng: &mut impl Rng,
    ) -> Result<(), ConfigError> {
        let mut pijt = BranchTransitionProbabilities::new(self.model, branch_length);
        for site in 0..current.len() {
            let category = rate_categories[site];
            let origin = current[site];
            let new_char = pijt.row(category, origin)?.draw(rng);
            if new_char != origin {
                delta_log.push((site, origin));
                current[site] = new_char;
            }
        }
        Ok(())
    }

    pub(crate) fn mutate_branch_gillespie(
        &self,
        current: &mut [usize],
        branch_length: f64,
        rate_categories: &[usize],
        delta_log: &mut Vec<(usize, usize)>,
        rng: &mut impl Rng,
    ) -> Result<(), ConfigError> {
        let site_weight = |current: &[usize], site: usize| -> f64 {
            -self.model.q(current[site], current[site]) * self.model.rate(rate_categories[site])
        };
        let mut sampler = WeightedSampler::new();
        for site in 0..current.len() {
            let weight = site_weight(current, site);
            debug_assert!(weight <= self.max_weight * 2.0, "site weight {weight} exceeds precomputed bound {}", self.max_weight);
            sampler.insert(weight)?;
        }

        let mut elapsed = 0.0;
        loop {
            let lambda: f64 = (0..current.len()).map(|site| sampler.weight_of(site).unwrap_or(0.0)).sum();
            if lambda <= 0.0 {
                break;
            }
            let dt = Exp::new(lambda).expect("lambda > 0 checked above").sample(rng);
            elapsed += dt;
            if elapsed >= branch_length {
                break;
            }
            let site = sampler.draw(rng);
            let origin = current[site];
            let new_char = self.character_samplers[origin].draw(rng);
            delta_log.push((site, origin));
            current[site] = new_char;
            let updated = -self.model.q(new_char, new_char) * self.model.rate(rate_categories[site]);
            debug_assert!(updated == 0.0 || updated >= self.min_weight / 2.0, "site weight {updated} below precomputed bound {}", self.min_weight);
            sampler.update_weight(site, updated)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::testing::{ArrayTree, JukesCantor};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn root_sequence_characters_are_in_alphabet_range() {
        let jc = JukesCantor::new(4, 1.0);
        let engine = SubstitutionEngine::new(&jc, 0.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let root = engine.draw_root_sequence(20, &mut rng).unwrap();
        assert_eq!(root.len(), 20);
        assert!(root.iter().all(|&c| c < 4));
    }

    #[test]
    fn full_sweep_strategy_produces_one_sequence_per_node() {
        let jc = JukesCantor::new(4, 1.0);
        let engine = SubstitutionEngine::new(&jc, 0.0).unwrap();
        let tree = ArrayTree::three_leaves();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let root = engine.draw_root_sequence(16, &mut rng).unwrap();
        let categories = vec![0usize; 16];
        let outputs = engine.simulate(&tree, root, &categories, &mut rng).unwrap();
        assert_eq!(outputs.len(), tree.node_count());
        for seq in outputs.values() {
            assert_eq!(seq.len(), 16);
        }
    }

    #[test]
    fn gillespie_strategy_is_selected_for_short_branches() {
        let jc = JukesCantor::new(4, 1.0);
        let engine = SubstitutionEngine::new(&jc, 1000.0).unwrap();
        let tree = ArrayTree::three_leaves();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let root = engine.draw_root_sequence(10, &mut rng).unwrap();
        let categories = vec![0usize; 10];
        let outputs = engine.simulate(&tree, root, &categories, &mut rng).unwrap();
        assert_eq!(outputs.len(), tree.node_count());
    }

    #[test]
    fn sibling_subtrees_are_independent_of_each_other() {
        // With a zero-length branch to B, B's sequence must exactly equal
        // the root's, regardless of what happened along A's branch first —
        // this is the delta-log undo being exercised.
        let jc = JukesCantor::new(4, 1.0);
        let engine = SubstitutionEngine::new(&jc, 0.0).unwrap();
        let tree = ArrayTree::from_parents(&[(None, 0.0, "root"), (Some(0), 5.0, "A"), (Some(0), 0.0, "B")]);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let root = engine.draw_root_sequence(12, &mut rng).unwrap();
        let categories = vec![0usize; 12];
        let outputs = engine.simulate(&tree, root.clone(), &categories, &mut rng).unwrap();
        assert_eq!(outputs[&2], root);
    }
}
