//! Minimal concrete implementations of [`crate::Tree`],
//! [`crate::ReplacementModel`] and [`crate::LengthDistribution`], used only
//! by this workspace's own tests and examples. Production callers bring
//! their own newick-parsed tree and rate-matrix model.

use rand::Rng;

use crate::{LengthDistribution, ReplacementModel, Tree};

/// A tree stored as flat parent/children arrays — good enough for tests,
/// not meant to parse newick.
pub struct ArrayTree {
    children: Vec<Vec<usize>>,
    branch_length: Vec<f64>,
    names: Vec<String>,
    root: usize,
}

impl ArrayTree {
    /// Build a tree from `(parent, branch_length, name)` triples, one per
    /// node, in an order where every parent index is smaller than its
    /// children's indices (node 0 is always the root).
    pub fn from_parents(nodes: &[(Option<usize>, f64, &str)]) -> Self {
        let n = nodes.len();
        let mut children = vec![Vec::new(); n];
        let mut branch_length = vec![0.0; n];
        let mut names = Vec::with_capacity(n);
        let mut root = 0;
        for (id, (parent, dist, name)) in nodes.iter().enumerate() {
            branch_length[id] = *dist;
            names.push((*name).to_string());
            match parent {
                Some(p) => children[*p].push(id),
                None => root = id,
            }
        }
        Self { children, branch_length, names, root }
    }

    /// A small three-leaf tree `(A:0.1,B:0.2,C:0.3)` with an unnamed root,
    /// used throughout this workspace's end-to-end tests.
    pub fn three_leaves() -> Self {
        Self::from_parents(&[
            (None, 0.0, "root"),
            (Some(0), 0.1, "A"),
            (Some(0), 0.2, "B"),
            (Some(0), 0.3, "C"),
        ])
    }
}

impl Tree for ArrayTree {
    fn children(&self, node: usize) -> &[usize] {
        &self.children[node]
    }

    fn branch_length(&self, node: usize) -> f64 {
        self.branch_length[node]
    }

    fn node_count(&self) -> usize {
        self.children.len()
    }

    fn root(&self) -> usize {
        self.root
    }

    fn name(&self, node: usize) -> &str {
        &self.names[node]
    }
}

/// Jukes-Cantor: uniform stationary frequencies, equal substitution rates,
/// a single rate category.
pub struct JukesCantor {
    alphabet_size: usize,
    mu: f64,
}

impl JukesCantor {
    pub fn new(alphabet_size: usize, mu: f64) -> Self {
        Self { alphabet_size, mu }
    }
}

impl ReplacementModel for JukesCantor {
    fn q(&self, i: usize, j: usize) -> f64 {
        let n = self.alphabet_size as f64;
        if i == j {
            -self.mu * (n - 1.0) / n
        } else {
            self.mu / n
        }
    }

    fn freq(&self, _i: usize) -> f64 {
        1.0 / self.alphabet_size as f64
    }

    fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    fn rate(&self, _category: usize) -> f64 {
        1.0
    }

    fn num_categories(&self) -> usize {
        1
    }

    fn p(&self, i: usize, j: usize, _category: usize, t: f64) -> f64 {
        let n = self.alphabet_size as f64;
        let exp_term = (-self.mu * n / (n - 1.0) * t).exp();
        if i == j {
            1.0 / n + (n - 1.0) / n * exp_term
        } else {
            1.0 / n - exp_term / n
        }
    }
}

/// A length distribution that always returns the same fixed length.
pub struct FixedLength(pub u64);

impl LengthDistribution for FixedLength {
    fn draw(&self, _rng: &mut dyn rand::RngCore) -> u64 {
        self.0
    }
}

/// A truncated Zipf-like length distribution built directly from a
/// cumulative-probability table, good enough for tests that need a
/// non-degenerate indel length distribution without pulling in the
/// alias sampler from `indel-core`.
pub struct TruncatedZipf {
    cumulative: Vec<f64>,
}

impl TruncatedZipf {
    pub fn new(max_length: u64, exponent: f64) -> Self {
        let weights: Vec<f64> = (1..=max_length)
            .map(|l| 1.0 / (l as f64).powf(exponent))
            .collect();
        let total: f64 = weights.iter().sum();
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut running = 0.0;
        for w in weights {
            running += w / total;
            cumulative.push(running);
        }
        Self { cumulative }
    }
}

impl LengthDistribution for TruncatedZipf {
    fn draw(&self, rng: &mut dyn rand::RngCore) -> u64 {
        let x: f64 = rng.gen_range(0.0..1.0);
        for (idx, cum) in self.cumulative.iter().enumerate() {
            if x < *cum {
                return (idx + 1) as u64;
            }
        }
        self.cumulative.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_model;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn three_leaves_tree_shape() {
        let tree = ArrayTree::three_leaves();
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.children(tree.root()).len(), 3);
        assert!(tree.is_leaf(1));
        assert_eq!(tree.name(1), "A");
    }

    #[test]
    fn jukes_cantor_passes_validation() {
        let jc = JukesCantor::new(4, 1.0);
        validate_model(&jc).unwrap();
    }

    #[test]
    fn truncated_zipf_stays_in_range() {
        let dist = TruncatedZipf::new(10, 1.5);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1000 {
            let l = dist.draw(&mut rng);
            assert!((1..=10).contains(&l));
        }
    }
}
