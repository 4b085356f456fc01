//! Trained model and metadata types

use crate::forest::RandomForestRegressor;
use crate::linear::LinearRegressor;
use crate::TrainingError;
use chrono::{DateTime, Utc};
use feature_engine::{feature_names, FeatureVector, OutputVariable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regression algorithm family selected for a training run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Ordinary least squares
    Fast,
    /// Random forest
    #[default]
    Accurate,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Fast => "fast",
            ModelKind::Accurate => "accurate",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" | "linear" => Ok(ModelKind::Fast),
            "accurate" | "forest" | "random_forest" => Ok(ModelKind::Accurate),
            other => Err(format!("unknown model kind: {}", other)),
        }
    }
}

/// Fitted regressor, one variant per model kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Regressor {
    Linear(LinearRegressor),
    Forest(RandomForestRegressor),
}

impl Regressor {
    pub fn kind(&self) -> ModelKind {
        match self {
            Regressor::Linear(_) => ModelKind::Fast,
            Regressor::Forest(_) => ModelKind::Accurate,
        }
    }

    /// Number of input features the regressor was fitted on
    pub fn n_features(&self) -> usize {
        match self {
            Regressor::Linear(m) => m.n_features(),
            Regressor::Forest(m) => m.n_features(),
        }
    }

    /// Check that the regressor consumes exactly `n_features` inputs and
    /// that its internal structure is usable for prediction
    pub fn check_structure(&self, n_features: usize) -> Result<(), String> {
        if self.n_features() != n_features {
            return Err(format!(
                "regressor expects {} features, metadata lists {}",
                self.n_features(),
                n_features
            ));
        }
        match self {
            Regressor::Linear(m) => m.check_structure(),
            Regressor::Forest(m) => m.check_structure(),
        }
    }

    /// Predict a single row of features
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            Regressor::Linear(m) => m.predict_row(row),
            Regressor::Forest(m) => m.predict_row(row),
        }
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        match self {
            Regressor::Linear(m) => m.feature_importances(),
            Regressor::Forest(m) => m.feature_importances(),
        }
    }
}

/// Regressor bound to exactly one output variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    output_variable: OutputVariable,
    regressor: Regressor,
}

impl TrainedModel {
    pub fn new(output_variable: OutputVariable, regressor: Regressor) -> Self {
        Self {
            output_variable,
            regressor,
        }
    }

    pub fn output_variable(&self) -> OutputVariable {
        self.output_variable
    }

    pub fn kind(&self) -> ModelKind {
        self.regressor.kind()
    }

    pub fn regressor(&self) -> &Regressor {
        &self.regressor
    }

    /// Predict from a canonical feature vector
    pub fn predict(&self, features: &FeatureVector) -> Result<f64, TrainingError> {
        let expected = self.regressor.n_features();
        if features.values.len() != expected {
            return Err(TrainingError::Shape {
                expected,
                actual: features.values.len(),
            });
        }
        Ok(self.regressor.predict_row(features.as_slice()))
    }

    /// `(feature, importance)` pairs sorted by descending importance
    pub fn feature_importances(&self) -> Vec<(&'static str, f64)> {
        let mut pairs: Vec<(&'static str, f64)> = feature_names()
            .iter()
            .copied()
            .zip(self.regressor.feature_importances())
            .collect();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
        pairs
    }
}

/// Name of a validation metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    R2,
    Mae,
}

/// Metric value tagged with the metric it measures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetric {
    pub metric: MetricKind,
    pub value: f64,
}

/// Metadata persisted alongside each trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub trained_at: DateTime<Utc>,
    /// Ordered feature list the model consumes
    pub feature_names: Vec<String>,
    pub output_variable: OutputVariable,
    pub validation_metric: ValidationMetric,
    pub model_kind: ModelKind,
    #[serde(default)]
    pub training_samples: usize,
    #[serde(default)]
    pub validation_samples: usize,
    #[serde(default)]
    pub training_duration_secs: f64,
}
