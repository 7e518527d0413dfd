//! Trait-level contracts for the external collaborators the simulation core
//! consumes: a rooted phylogenetic tree, a character replacement model, and
//! indel length distributions. None of these are implemented here for
//! production use — concrete trees come from a newick parser, concrete
//! models come from a rate-matrix table, concrete distributions come from a
//! protocol file. This crate only fixes the shape of those collaborators.

use rand::Rng;

mod error;
pub use error::ModelError;

pub mod testing;

/// Opaque node identifier. Trees are free to number nodes however they like;
/// the simulation core only ever stores and compares these.
pub type NodeId = usize;

/// A rooted, ordered tree with real-valued branch lengths.
///
/// Implementations are expected to be cheap to query repeatedly: the
/// indel simulator and the MSA assembler both walk the tree once per
/// simulation, calling `children`/`branch_length`/`is_leaf` once per node.
pub trait Tree {
    /// Children of `node`, in a stable left-to-right order.
    fn children(&self, node: NodeId) -> &[NodeId];

    /// `true` iff `node` has no children.
    fn is_leaf(&self, node: NodeId) -> bool {
        self.children(node).is_empty()
    }

    /// Branch length separating `node` from its parent. Undefined (callers
    /// must not call it) for the root.
    fn branch_length(&self, node: NodeId) -> f64;

    /// Total number of nodes in the tree, including the root.
    fn node_count(&self) -> usize;

    /// The root node's id.
    fn root(&self) -> NodeId;

    /// Human-readable name, used only for FASTA headers.
    fn name(&self, node: NodeId) -> &str;
}

/// A continuous-time Markov replacement model over an alphabet of size
/// `alphabet_size()`, plus a fixed set of rate categories.
pub trait ReplacementModel {
    /// Off-diagonal and diagonal entries of the rate matrix `Q(i, j)`.
    /// Off-diagonal entries must be `>= 0`; `Q(i, i)` must be `<= 0`.
    fn q(&self, i: usize, j: usize) -> f64;

    /// Stationary frequency of character `i`. Must sum to 1 over the
    /// alphabet (checked by constructors that consume this trait).
    fn freq(&self, i: usize) -> f64;

    /// Size of the character alphabet (4 for nucleotide, 20 for amino acid).
    fn alphabet_size(&self) -> usize;

    /// Relative rate multiplier of rate category `category`.
    fn rate(&self, category: usize) -> f64;

    /// Number of rate categories.
    fn num_categories(&self) -> usize;

    /// Transition probability `P(i -> j, t)` for rate category `category`.
    fn p(&self, i: usize, j: usize, category: usize, t: f64) -> f64;
}

/// An opaque length sampler used for indel event sizes.
pub trait LengthDistribution {
    /// Draw a strictly positive length.
    fn draw(&self, rng: &mut dyn rand::RngCore) -> u64;
}

/// Blanket helper so closures and simple generators can stand in for a
/// [`LengthDistribution`] in tests without a dedicated type.
impl<F> LengthDistribution for F
where
    F: Fn(&mut dyn rand::RngCore) -> u64,
{
    fn draw(&self, rng: &mut dyn rand::RngCore) -> u64 {
        self(rng)
    }
}

/// Validate a `ReplacementModel`'s rate matrix and stationary frequencies:
/// non-negative off-diagonal rates, non-positive diagonal rates, frequencies
/// summing to one, and at least one non-negative rate category.
pub fn validate_model(model: &dyn ReplacementModel) -> Result<(), ModelError> {
    let n = model.alphabet_size();
    if n == 0 {
        return Err(ModelError::EmptyAlphabet);
    }
    let mut freq_sum = 0.0;
    for i in 0..n {
        let f = model.freq(i);
        if f < 0.0 {
            return Err(ModelError::NegativeFrequency { index: i, value: f });
        }
        freq_sum += f;
        if model.q(i, i) > 0.0 {
            return Err(ModelError::PositiveDiagonal { index: i, value: model.q(i, i) });
        }
        for j in 0..n {
            if i != j && model.q(i, j) < 0.0 {
                return Err(ModelError::NegativeOffDiagonal { i, j, value: model.q(i, j) });
            }
        }
    }
    if (freq_sum - 1.0).abs() > 1e-6 {
        return Err(ModelError::FrequenciesDontSumToOne { sum: freq_sum });
    }
    if model.num_categories() == 0 {
        return Err(ModelError::NoRateCategories);
    }
    for c in 0..model.num_categories() {
        if model.rate(c) < 0.0 {
            return Err(ModelError::NegativeRate { category: c, value: model.rate(c) });
        }
    }
    Ok(())
}

/// Draw an index in `[0, n)` uniformly — a thin wrapper kept so call sites
/// read as intent ("pick a node at random") rather than raw `gen_range`.
pub fn uniform_index(n: usize, rng: &mut impl Rng) -> usize {
    rng.gen_range(0..n)
}
