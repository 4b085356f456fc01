//! Feature Engineering Engine
//!
//! Loads the tire-wear dataset, derives the engineered interaction features
//! and summarizes per-feature ranges used for UI bounds and default fills,
//! along with the pairwise correlations between columns.

mod dataset;
mod features;
mod statistics;

pub use dataset::{CsvDatasetSource, Dataset, DatasetSource, InMemorySource};
pub use features::{
    derive_dataset, derive_features, feature_names, raw_parameter_names, FeatureVector,
    OutputVariable, RawParameter, RawRow, ENGINEERED_FEATURES, FEATURE_DIMENSION,
    RAW_DIMENSION,
};
pub use statistics::{
    correlation_matrix, pearson, summarize, Correlations, FeatureRange, FeatureRanges,
};

use thiserror::Error;

/// Errors during dataset handling and feature derivation
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Missing raw parameter: {0}")]
    MissingParameter(String),
    #[error("{name} value {value} is not finite")]
    NonFinite { name: String, value: f64 },
    #[error("Column {name} has {actual} rows, expected {expected}")]
    ColumnLength {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid sample fraction {0}: must be in (0, 1]")]
    InvalidSampleFraction(f64),
    #[error("CSV error in {path}: {message}")]
    Csv { path: String, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
