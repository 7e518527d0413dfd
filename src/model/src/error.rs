use thiserror::Error;

/// Validation failures for a [`crate::ReplacementModel`]: malformed rate
/// matrix, frequencies that don't sum to one, or a negative rate category.
/// Raised once at engine construction, never mid-simulation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("replacement model has an empty alphabet")]
    EmptyAlphabet,

    #[error("stationary frequency at index {index} is negative: {value}")]
    NegativeFrequency { index: usize, value: f64 },

    #[error("stationary frequencies sum to {sum}, expected 1.0")]
    FrequenciesDontSumToOne { sum: f64 },

    #[error("Q({index},{index}) must be <= 0, got {value}")]
    PositiveDiagonal { index: usize, value: f64 },

    #[error("Q({i},{j}) must be >= 0, got {value}")]
    NegativeOffDiagonal { i: usize, j: usize, value: f64 },

    #[error("replacement model declares zero rate categories")]
    NoRateCategories,

    #[error("rate category {category} has a negative rate: {value}")]
    NegativeRate { category: usize, value: f64 },
}
