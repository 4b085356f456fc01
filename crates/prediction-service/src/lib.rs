//! Tire Wear Prediction Service
//!
//! Owns the trained models for the lifetime of the process. Models are
//! loaded from the store on first use, or trained and persisted when the
//! store has never been populated.

mod analysis;
mod service;

pub use analysis::{
    CorrelationDirection, CorrelationEntry, CorrelationReport, CorrelationStrength,
    DrivingScenario, ImpactEntry, ImpactReport, ScenarioPrediction,
};
pub use service::{
    Health, Initialization, ParameterRequest, PredictionResult, PredictionService,
    LoadedModels, ServiceConfig, ServiceState, StateKind,
};

use thiserror::Error;

/// Errors surfaced by the prediction service
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Training failed: {0}")]
    Training(String),
    #[error("Model store corrupted: {0}")]
    StoreCorruption(String),
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("Service not ready (state: {0})")]
    NotReady(StateKind),
    #[error("Initialization timed out after {0}ms")]
    Timeout(u64),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Short machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Configuration(_) => "configuration",
            ServiceError::Training(_) => "training",
            ServiceError::StoreCorruption(_) => "store_corruption",
            ServiceError::UnknownParameter(_) => "unknown_parameter",
            ServiceError::InvalidValue { .. } => "invalid_value",
            ServiceError::NotReady(_) => "not_ready",
            ServiceError::Timeout(_) => "timeout",
            ServiceError::Internal(_) => "internal",
        }
    }

    /// Caller sent something the service cannot accept
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            ServiceError::UnknownParameter(_) | ServiceError::InvalidValue { .. }
        )
    }
}
