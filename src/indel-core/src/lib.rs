//! Indel state machine and coordinate bookkeeping, plus the substitution
//! engine that colors the resulting alignment with characters.
//!
//! This crate is the "core" described in the project's specification: it
//! owns the block tree (C4), the indel event simulator (C5), the
//! super-sequence/column arena (C6), sequence views (C7), the MSA
//! assembler (C8) and the substitution engine (C9), plus the three
//! sampling primitives (C1-C3) those components are built on. It does not
//! parse newick trees, build replacement-model rate matrices, read a
//! configuration file, or write FASTA to disk — those are external
//! collaborators, specified only through the traits in the `model` crate.
//!
//! The top-level entry point is [`simulate`], which drives a single
//! end-to-end run: indel events per branch, MSA column assembly, and
//! character coloring, given a [`model::Tree`], a [`model::ReplacementModel`]
//! and a [`protocol::SimulationProtocol`].

pub mod block_tree;
pub mod error;
pub mod event;
pub mod indel;
pub mod msa;
pub mod protocol;
pub mod sampler;
pub mod sequence_view;
pub mod substitution;
pub mod supersequence;

pub use block_tree::{Block, BlockList, BlockTree};
pub use error::Error;
pub use event::{Event, EventKind, EventMap, EventSequence};
pub use msa::{Msa, MsaRow};
pub use protocol::{SimulationProtocol, SiteRateModel};
pub use sequence_view::SequenceView;
pub use substitution::SubstitutionEngine;
pub use supersequence::{ColumnHandle, SuperSequence};

use std::collections::HashMap;

use model::{NodeId, ReplacementModel, Tree};
use rand::Rng;

use indel::IndelSimulator;
use sampler::CategoryPathSampler;

/// Everything produced by one end-to-end run: the assembled MSA plus the
/// per-node character sequences needed to expand it into FASTA text.
pub struct SimulationOutput {
    pub msa: Msa,
    pub characters: HashMap<NodeId, Vec<usize>>,
}

impl SimulationOutput {
    /// Expand the MSA into FASTA text using `alphabet` to turn a character
    /// index into its one-letter code (e.g. `"ACGT"` or an amino-acid
    /// alphabet string), via `tree` for node names.
    pub fn to_fasta_string<T: Tree>(&self, tree: &T, alphabet: &str) -> String {
        let letters: Vec<char> = alphabet.chars().collect();
        self.msa.to_fasta_string(
            |node| tree.name(node).to_string(),
            |node, seq_index| letters[self.characters[&node][seq_index]],
        )
    }
}

/// Run one complete simulation: indel events along every branch of `tree`,
/// replayed into per-node block lists and then into aligned column
/// coordinates, colored with characters drawn from `model`.
///
/// `nodes_to_save` selects which nodes' sequences appear in the resulting
/// MSA (commonly the leaves, but internal ancestors can be requested too).
/// Capacities size the block-tree arena and the super-sequence's column
/// arena; both must comfortably exceed the largest sequence the run is
/// expected to produce (`CapacityError` aborts the run otherwise).
pub fn simulate<T: Tree, R: Rng>(
    tree: &T,
    model: &dyn ReplacementModel,
    protocol: &SimulationProtocol,
    nodes_to_save: &[NodeId],
    block_arena_capacity: usize,
    column_arena_capacity: usize,
    rng: &mut R,
) -> Result<SimulationOutput, Error> {
    let events = IndelSimulator::new(protocol).generate_simulation(tree, rng);
    log::trace!(
        "generated indel event streams for {} branches",
        tree.node_count().saturating_sub(1)
    );

    // Built unconditionally: `Simple` draws every inserted site's category
    // independently from this same chain's stationary distribution, while
    // `IndelAware` additionally lets the block tree bridge it against the
    // categories flanking the insertion (see `block_tree::Block::handle_insertion`).
    let category_freq = vec![1.0 / model.num_categories() as f64; model.num_categories()];
    let category_sampler = CategoryPathSampler::new(category_freq, protocol.category_correlation)?;
    let engine = SubstitutionEngine::new(model, protocol.gillespie_threshold)?;

    let mut block_tree = BlockTree::with_capacity(block_arena_capacity);
    let mut super_sequence = SuperSequence::new(protocol.sequence_size, column_arena_capacity)?;
    let root = tree.root();
    let root_view = SequenceView::root(&super_sequence, protocol.sequence_size);
    let root_characters = engine.draw_root_sequence(protocol.sequence_size as usize, rng)?;
    let root_categories = draw_category_chain(&category_sampler, protocol.sequence_size as usize, rng);

    let mut views: HashMap<NodeId, SequenceView> = HashMap::new();
    let mut categories: HashMap<NodeId, Vec<usize>> = HashMap::new();
    let mut characters: HashMap<NodeId, Vec<usize>> = HashMap::new();
    views.insert(root, root_view);
    categories.insert(root, root_categories);
    characters.insert(root, root_characters);

    build_views_recursive(
        tree,
        root,
        &events,
        &mut block_tree,
        &mut super_sequence,
        &engine,
        &category_sampler,
        protocol.site_rate_model,
        &mut views,
        &mut categories,
        &mut characters,
        rng,
    )?;

    let save_set: Vec<(NodeId, SequenceView)> =
        nodes_to_save.iter().map(|&node| (node, views[&node].clone())).collect();
    let msa = Msa::assemble(&save_set, &mut super_sequence);

    Ok(SimulationOutput { msa, characters })
}

/// A chain of `length` rate categories, the first drawn from the
/// stationary distribution and every following one conditioned on its
/// predecessor — the root sequence's own categories, which have no parent
/// to inherit from.
fn draw_category_chain(sampler: &CategoryPathSampler, length: usize, rng: &mut impl Rng) -> Vec<usize> {
    let mut categories = Vec::with_capacity(length);
    if length == 0 {
        return categories;
    }
    let mut current = sampler.initial(rng);
    categories.push(current);
    for _ in 1..length {
        current = sampler.next(current, rng);
        categories.push(current);
    }
    categories
}

/// Replay `blocklist` against `parent_categories`, the way
/// [`SequenceView::from_blocklist`] replays it against a parent's column
/// handles: original-sequence runs inherit the parent's category at that
/// position, insertion runs draw fresh ones (no spatial correlation to the
/// rest of the sequence is attempted here — that's what `IndelAware`'s
/// [`build_node_categories_from_blocks`] is for).
fn build_node_categories_independent(
    parent_categories: &[usize],
    blocklist: &BlockList,
    sampler: &CategoryPathSampler,
    rng: &mut impl Rng,
) -> Vec<usize> {
    let mut categories = Vec::new();
    for &(key, length, insertion) in blocklist {
        for offset in 0..length {
            categories.push(parent_categories[(key + offset) as usize]);
        }
        for _ in 0..insertion {
            categories.push(sampler.initial(rng));
        }
    }
    categories
}

/// Like [`build_node_categories_independent`], but insertion runs pull the
/// categories the block tree already bridged against their flanking
/// positions (`Block::handle_insertion`), stored as `[sentinel, ...]` in
/// each block's own `rate_categories`.
fn build_node_categories_from_blocks(parent_categories: &[usize], blocklist: &[(u64, Block)]) -> Vec<usize> {
    let mut categories = Vec::new();
    for (key, block) in blocklist {
        for offset in 0..block.length {
            categories.push(parent_categories[(key + offset) as usize]);
        }
        if let Some(rates) = &block.rate_categories {
            categories.extend(rates.iter().skip(1).copied());
        } else {
            debug_assert_eq!(block.insertion, 0, "an insertion-bearing block must carry rate categories in IndelAware mode");
        }
    }
    categories
}

/// Replay `blocklist` against `parent_characters`: inherited positions
/// carry over the parent's (already branch-mutated) character, inserted
/// positions draw fresh ones from the model's stationary distribution —
/// they never existed under any ancestor, so there's nothing to inherit.
fn build_node_characters(parent_characters: &[usize], blocklist: &BlockList, engine: &SubstitutionEngine, rng: &mut impl Rng) -> Vec<usize> {
    let mut characters = Vec::new();
    for &(key, length, insertion) in blocklist {
        for offset in 0..length {
            characters.push(parent_characters[(key + offset) as usize]);
        }
        for _ in 0..insertion {
            characters.push(engine.draw_stationary(rng));
        }
    }
    characters
}

#[allow(clippy::too_many_arguments)]
fn build_views_recursive<T: Tree, R: Rng>(
    tree: &T,
    node: NodeId,
    events: &EventMap,
    block_tree: &mut BlockTree,
    super_sequence: &mut SuperSequence,
    engine: &SubstitutionEngine,
    category_sampler: &CategoryPathSampler,
    site_rate_model: SiteRateModel,
    views: &mut HashMap<NodeId, SequenceView>,
    categories: &mut HashMap<NodeId, Vec<usize>>,
    characters: &mut HashMap<NodeId, Vec<usize>>,
    rng: &mut R,
) -> Result<(), Error> {
    for &child in tree.children(node) {
        let parent_length = views[&node].len() as u64;
        let parent_categories = categories[&node].clone();
        let parent_characters = characters[&node].clone();

        let (block_list, child_categories) = match site_rate_model {
            SiteRateModel::IndelAware => {
                block_tree.init_with_rates(parent_length, Some(parent_categories.clone()))?;
                for event in events.events(child) {
                    block_tree.handle_event_with_categories(event, category_sampler, rng)?;
                }
                let full = block_tree.blocklist_with_blocks();
                let child_categories = build_node_categories_from_blocks(&parent_categories, &full);
                let block_list: BlockList = full.iter().map(|(key, block)| (*key, block.length, block.insertion)).collect();
                (block_list, child_categories)
            }
            SiteRateModel::Simple => {
                block_tree.init(parent_length)?;
                for event in events.events(child) {
                    block_tree.handle_event(event)?;
                }
                let block_list = block_tree.blocklist();
                let child_categories = build_node_categories_independent(&parent_categories, &block_list, category_sampler, rng);
                (block_list, child_categories)
            }
        };

        let parent_view = views[&node].clone();
        let child_view = SequenceView::from_blocklist(&parent_view, &block_list, super_sequence)?;

        let mut child_characters = build_node_characters(&parent_characters, &block_list, engine, rng);
        let branch_length = tree.branch_length(child);
        let mut delta_log = Vec::new();
        engine.mutate_branch(&mut child_characters, branch_length, &child_categories, &mut delta_log, rng)?;

        views.insert(child, child_view);
        categories.insert(child, child_categories);
        characters.insert(child, child_characters);

        build_views_recursive(
            tree,
            child,
            events,
            block_tree,
            super_sequence,
            engine,
            category_sampler,
            site_rate_model,
            views,
            categories,
            characters,
            rng,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::testing::{ArrayTree, FixedLength, JukesCantor};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn protocol(num_branches: usize) -> SimulationProtocol {
        SimulationProtocol::new(
            num_branches,
            5,
            1,
            vec![0.02; num_branches],
            vec![0.02; num_branches],
            (0..num_branches).map(|_| Box::new(FixedLength(1)) as Box<dyn model::LengthDistribution>).collect(),
            (0..num_branches).map(|_| Box::new(FixedLength(1)) as Box<dyn model::LengthDistribution>).collect(),
            SiteRateModel::Simple,
            10,
            42,
            0.0,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn small_tree_msa_has_one_row_per_saved_node_and_equal_row_lengths() {
        let tree = ArrayTree::three_leaves();
        let jc = JukesCantor::new(4, 1.0);
        let protocol = protocol(3);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let output = simulate(&tree, &jc, &protocol, &[1, 2, 3], 4096, 4096, &mut rng).unwrap();
        output.msa.validate().unwrap();
        assert_eq!(output.msa.rows.len(), 3);
        assert!(output.msa.length >= protocol.sequence_size);

        let fasta = output.to_fasta_string(&tree, "ACGT");
        assert_eq!(fasta.matches('>').count(), 3);
    }

    #[test]
    fn saving_only_the_root_yields_a_gap_free_alignment() {
        let tree = ArrayTree::three_leaves();
        let jc = JukesCantor::new(4, 1.0);
        let protocol = protocol(3);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let output = simulate(&tree, &jc, &protocol, &[0], 4096, 4096, &mut rng).unwrap();
        assert_eq!(output.msa.length, protocol.sequence_size);
        assert_eq!(output.msa.rows[0].runs, vec![protocol.sequence_size as i64]);
    }
}
