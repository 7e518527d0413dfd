//! Thin driver wiring together [`model`]'s external-collaborator traits and
//! [`indel_core`]'s simulation engine into a single runnable scenario. This
//! crate intentionally does none of the work itself — it only threads a
//! seeded RNG, a tree, a replacement model and a [`indel_core::SimulationProtocol`]
//! through [`indel_core::simulate`], and formats the result.
//!
//! Newick parsing, rate-matrix tables, and a configuration file format are
//! left to callers (§1 of the project's design notes); this crate's demo
//! binary plugs in `model::testing`'s minimal stand-ins instead.

use located_error::prelude::*;
use model::testing::{ArrayTree, JukesCantor, TruncatedZipf};
use model::LengthDistribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use indel_core::{SimulationOutput, SimulationProtocol, SiteRateModel};

/// A small, three-leaf scenario `(A:0.1,B:0.2,C:0.3)` evolving a
/// nucleotide sequence under Jukes-Cantor, used by the demo binary. Returns
/// the tree alongside the simulation output so the caller can resolve node
/// names when formatting FASTA.
pub fn run_demo_scenario(seed: u64) -> Result<(ArrayTree, SimulationOutput)> {
    let tree = ArrayTree::three_leaves();
    let model = JukesCantor::new(4, 1.0);

    let num_branches = 3;
    let protocol = SimulationProtocol::new(
        num_branches,
        50,
        5,
        vec![0.05; num_branches],
        vec![0.05; num_branches],
        (0..num_branches)
            .map(|_| Box::new(TruncatedZipf::new(10, 1.5)) as Box<dyn LengthDistribution>)
            .collect(),
        (0..num_branches)
            .map(|_| Box::new(TruncatedZipf::new(10, 1.5)) as Box<dyn LengthDistribution>)
            .collect(),
        SiteRateModel::Simple,
        10,
        seed,
        0.0,
        0.0,
    )
    .loc("building the demo scenario's simulation protocol")?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let output = indel_core::simulate(&tree, &model, &protocol, &[1, 2, 3], 8192, 8192, &mut rng)
        .loc("running the demo scenario's simulation")?;

    Ok((tree, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(test)] use pretty_assertions::assert_eq;

    #[test]
    fn demo_scenario_produces_a_well_formed_msa() {
        let (tree, output) = run_demo_scenario(1234).unwrap();
        output.msa.validate().unwrap();
        let fasta = output.to_fasta_string(&tree, "ACGT");
        assert_eq!(fasta.matches('>').count(), 3);
    }
}
