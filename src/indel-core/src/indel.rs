//! Indel event simulator (C5): walks a tree top-down, generating a
//! Gillespie-style sequence of insertion/deletion events per branch from
//! the combined insertion/deletion rate, and recording them into an
//! [`EventMap`] for later replay by the MSA assembler.
//!
//! Ported from `original_source/src/IndelSimulator.h::simulateAlongBranch`.
//! The trial deletion length is drawn once before the first waiting time
//! and redrawn immediately after every applied event (insertion or
//! deletion) so the deletion rate term always reflects a fresh draw.

use model::{NodeId, Tree};
use rand::Rng;
use rand_distr::{Distribution, Exp, Uniform};

use crate::event::{Event, EventMap};
use crate::protocol::SimulationProtocol;

pub struct IndelSimulator<'p> {
    protocol: &'p SimulationProtocol,
}

impl<'p> IndelSimulator<'p> {
    pub fn new(protocol: &'p SimulationProtocol) -> Self {
        Self { protocol }
    }

    /// Simulate indel evolution across every branch of `tree`, rooted with
    /// a single synthetic insertion event seeding the root's sequence size.
    pub fn generate_simulation<T: Tree>(&self, tree: &T, rng: &mut impl Rng) -> EventMap {
        log::trace!(
            "simulating indels over {} nodes, root sequence size {}",
            tree.node_count(),
            self.protocol.sequence_size
        );
        let mut events = EventMap::with_node_count(tree.node_count());
        let root = tree.root();
        events.push(root, Event::insertion(0, self.protocol.sequence_size));
        self.generate_recursive(tree, root, self.protocol.sequence_size, &mut events, rng);
        events
    }

    fn generate_recursive<T: Tree>(
        &self,
        tree: &T,
        node: NodeId,
        sequence_length: u64,
        events: &mut EventMap,
        rng: &mut impl Rng,
    ) {
        if tree.is_leaf(node) {
            return;
        }
        for &child in tree.children(node) {
            let (branch_events, new_length) =
                self.simulate_along_branch(sequence_length, tree.branch_length(child), child, rng);
            log::trace!(
                "branch to node {child}: {} events, length {sequence_length} -> {new_length}",
                branch_events.len()
            );
            for event in branch_events {
                events.push(child, event);
            }
            self.generate_recursive(tree, child, new_length, events, rng);
        }
    }

    /// Run the Gillespie indel process for `branch_length` time units,
    /// starting from a sequence of `seq_size`. Returns the applied events
    /// and the sequence length after the last one.
    pub fn simulate_along_branch(
        &self,
        seq_size: u64,
        branch_length: f64,
        branch: NodeId,
        rng: &mut impl Rng,
    ) -> (Vec<Event>, u64) {
        let mut events = Vec::new();
        let mut sequence_size = seq_size;
        let min_sequence_size = self.protocol.min_sequence_size;

        let insertion_rate = self.protocol.insertion_rate(branch);
        let deletion_rate = self.protocol.deletion_rate(branch);
        let insertion_length_dist = self.protocol.insertion_distribution(branch);
        let deletion_length_dist = self.protocol.deletion_distribution(branch);

        let mut sampled_deletion_length = deletion_length_dist.draw(rng);

        let mut sequence_wise_insertion_rate = insertion_rate * (sequence_size + 1) as f64;
        let mut sequence_wise_deletion_rate = deletion_rate * (sequence_size as f64 + (sampled_deletion_length as f64 - 1.0));
        if sequence_size <= min_sequence_size {
            sequence_wise_deletion_rate = 0.0;
        }

        let mut lambda = sequence_wise_insertion_rate + sequence_wise_deletion_rate;
        let mut remaining = branch_length;
        let mut waiting_time = draw_waiting_time(lambda, rng);

        while waiting_time < remaining {
            let insertion_probability = sequence_wise_insertion_rate / lambda;
            let coin: f64 = rng.gen_range(0.0..1.0);

            let event = if coin < insertion_probability {
                let position = rng.gen_range(0..=sequence_size);
                let length = insertion_length_dist.draw(rng);
                Event::insertion(position, length)
            } else {
                let lower = 1i64 - (sampled_deletion_length as i64 - 1);
                let position_dist = Uniform::new_inclusive(lower, sequence_size as i64);
                let mut position = position_dist.sample(rng);
                let mut length = sampled_deletion_length;
                if position < 1 {
                    length = (length as i64 + (position - 1)) as u64;
                    position = 1;
                }
                if length + position as u64 > sequence_size {
                    length = sequence_size - position as u64 + 1;
                }
                Event::deletion(position as u64, length)
            };

            match event.kind {
                crate::event::EventKind::Insertion => sequence_size += event.length,
                crate::event::EventKind::Deletion => sequence_size -= event.length,
            }
            events.push(event);

            sampled_deletion_length = deletion_length_dist.draw(rng);
            remaining -= waiting_time;
            sequence_wise_insertion_rate = insertion_rate * (sequence_size + 1) as f64;
            sequence_wise_deletion_rate = deletion_rate * (sequence_size as f64 + (sampled_deletion_length as f64 - 1.0));
            if sequence_size <= min_sequence_size {
                sequence_wise_deletion_rate = 0.0;
            }
            lambda = sequence_wise_insertion_rate + sequence_wise_deletion_rate;
            waiting_time = draw_waiting_time(lambda, rng);
        }

        (events, sequence_size)
    }
}

fn draw_waiting_time(lambda: f64, rng: &mut impl Rng) -> f64 {
    if lambda <= 0.0 {
        return f64::INFINITY;
    }
    Exp::new(lambda).expect("lambda > 0 checked above").sample(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::testing::{ArrayTree, FixedLength};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn protocol(num_branches: usize) -> SimulationProtocol {
        SimulationProtocol::new(
            num_branches,
            50,
            1,
            vec![0.05; num_branches],
            vec![0.05; num_branches],
            (0..num_branches).map(|_| Box::new(FixedLength(1)) as Box<dyn model::LengthDistribution>).collect(),
            (0..num_branches).map(|_| Box::new(FixedLength(1)) as Box<dyn model::LengthDistribution>).collect(),
            crate::protocol::SiteRateModel::Simple,
            10,
            7,
            0.0,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn zero_length_branch_produces_no_events() {
        let protocol = protocol(4);
        let simulator = IndelSimulator::new(&protocol);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (events, len) = simulator.simulate_along_branch(50, 0.0, 0, &mut rng);
        assert!(events.is_empty());
        assert_eq!(len, 50);
    }

    #[test]
    fn sequence_never_drops_below_minimum() {
        let protocol = protocol(4);
        let simulator = IndelSimulator::new(&protocol);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let (_, len) = simulator.simulate_along_branch(2, 50.0, 0, &mut rng);
        assert!(len >= protocol.min_sequence_size);
    }

    #[test]
    fn whole_tree_simulation_populates_every_non_root_node() {
        let protocol = protocol(4);
        let simulator = IndelSimulator::new(&protocol);
        let tree = ArrayTree::three_leaves();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let events = simulator.generate_simulation(&tree, &mut rng);
        assert_eq!(events.events(tree.root()).len(), 1);
        for leaf in [1, 2, 3] {
            assert!(!events.events(leaf).is_empty());
        }
    }
}
