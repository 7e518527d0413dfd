//! In-memory configuration for a single simulation run. Construction
//! validates every field and returns [`ConfigError`] on the first
//! violation; nothing here is re-checked on the simulation hot path.

use model::LengthDistribution;

use crate::error::ConfigError;

/// Whether rate categories are tracked per site through indel events
/// (`IndelAware`, slower, needed for spatially-correlated rate
/// heterogeneity across indels) or ignored (`Simple`, faster).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteRateModel {
    Simple,
    IndelAware,
}

pub struct SimulationProtocol {
    pub sequence_size: u64,
    pub min_sequence_size: u64,
    pub insertion_rate: Vec<f64>,
    pub deletion_rate: Vec<f64>,
    pub insertion_length: Vec<Box<dyn LengthDistribution>>,
    pub deletion_length: Vec<Box<dyn LengthDistribution>>,
    pub site_rate_model: SiteRateModel,
    pub max_insertion_length: u64,
    pub seed: u64,
    pub gillespie_threshold: f64,
    pub category_correlation: f64,
}

impl SimulationProtocol {
    /// `num_branches` is the number of non-root tree nodes; every per-branch
    /// vector (`insertion_rate`, `deletion_rate`, and the two length
    /// distribution vectors) must have exactly this many entries.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        num_branches: usize,
        sequence_size: u64,
        min_sequence_size: u64,
        insertion_rate: Vec<f64>,
        deletion_rate: Vec<f64>,
        insertion_length: Vec<Box<dyn LengthDistribution>>,
        deletion_length: Vec<Box<dyn LengthDistribution>>,
        site_rate_model: SiteRateModel,
        max_insertion_length: u64,
        seed: u64,
        gillespie_threshold: f64,
        category_correlation: f64,
    ) -> Result<Self, ConfigError> {
        if sequence_size == 0 {
            return Err(ConfigError::EmptySequence);
        }
        for (field, actual) in [
            ("insertion_rate", insertion_rate.len()),
            ("deletion_rate", deletion_rate.len()),
            ("insertion_length", insertion_length.len()),
            ("deletion_length", deletion_length.len()),
        ] {
            if actual != num_branches {
                return Err(ConfigError::BranchCountMismatch { field, expected: num_branches, actual });
            }
        }
        if !(0.0..=1.0).contains(&category_correlation) {
            return Err(ConfigError::InvalidCorrelation { value: category_correlation });
        }
        if !gillespie_threshold.is_finite() || gillespie_threshold < 0.0 {
            return Err(ConfigError::InvalidGillespieThreshold { value: gillespie_threshold });
        }
        Ok(Self {
            sequence_size,
            min_sequence_size,
            insertion_rate,
            deletion_rate,
            insertion_length,
            deletion_length,
            site_rate_model,
            max_insertion_length,
            seed,
            gillespie_threshold,
            category_correlation,
        })
    }

    pub fn insertion_rate(&self, branch: usize) -> f64 {
        self.insertion_rate[branch]
    }

    pub fn deletion_rate(&self, branch: usize) -> f64 {
        self.deletion_rate[branch]
    }

    pub fn insertion_distribution(&self, branch: usize) -> &dyn LengthDistribution {
        self.insertion_length[branch].as_ref()
    }

    pub fn deletion_distribution(&self, branch: usize) -> &dyn LengthDistribution {
        self.deletion_length[branch].as_ref()
    }
}
