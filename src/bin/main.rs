//! Demo CLI wiring together the indel and substitution simulation core.
//!
//! Runs the fixed three-leaf scenario from [`indelsim::run_demo_scenario`]
//! and prints the resulting alignment as FASTA. A real driver would parse a
//! newick tree and a protocol file instead of hardcoding both; those layers
//! are out of this crate's scope (see `SPEC_FULL.md` §1/§6).

use std::process;

#[macro_use]
extern crate log;

fn main() {
    logger::Logger::init(2);

    let seed = std::env::args()
        .nth(1)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(42);

    info!("running demo scenario with seed {seed}");
    match indelsim::run_demo_scenario(seed) {
        Ok((tree, output)) => {
            print!("{}", output.to_fasta_string(&tree, "ACGT"));
        }
        Err(err) => {
            error!("{err:?}");
            process::exit(1);
        }
    }
}
