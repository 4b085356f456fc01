//! Regression Model Trainer
//!
//! Fits one regressor per output variable against the canonical feature set.
//! The algorithm is selected by [`ModelKind`]: ordinary least squares for
//! fast turnaround, or a random forest for accuracy.

mod forest;
mod linear;
mod metrics;
mod model;
mod split;
mod trainer;

pub use forest::{RandomForestRegressor, RegressionTree};
pub use linear::LinearRegressor;
pub use metrics::{mean_absolute_error, r2_score};
pub use model::{MetricKind, ModelKind, ModelMetadata, Regressor, TrainedModel, ValidationMetric};
pub use split::{train_validation_split, Split};
pub use trainer::{ModelTrainer, TrainerConfig, TrainingFailure, TrainingOutcome, TrainingReport};

use thiserror::Error;

/// Errors during model training and evaluation
#[derive(Debug, Clone, Error)]
pub enum TrainingError {
    #[error("Target column {0} is absent from the dataset")]
    MissingTarget(String),
    #[error("Target column {0} has zero variance")]
    ZeroVariance(String),
    #[error("Missing feature column(s): {}", .0.join(", "))]
    MissingFeatures(Vec<String>),
    #[error("Need at least {required} rows, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },
    #[error("Invalid validation fraction {0}: must be in (0, 1)")]
    InvalidValidationFraction(f64),
    #[error("Normal equations are singular")]
    SingularSystem,
    #[error("Shape mismatch: expected {expected} features, got {actual}")]
    Shape { expected: usize, actual: usize },
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}
