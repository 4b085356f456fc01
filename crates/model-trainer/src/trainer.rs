//! Per-output-variable training with failure isolation

use crate::forest::RandomForestRegressor;
use crate::linear::LinearRegressor;
use crate::metrics::{mean_absolute_error, r2_score};
use crate::model::{MetricKind, ModelKind, ModelMetadata, Regressor, TrainedModel, ValidationMetric};
use crate::split::train_validation_split;
use crate::TrainingError;
use chrono::Utc;
use feature_engine::{feature_names, Dataset, OutputVariable};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

/// Training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Algorithm family
    pub model_kind: ModelKind,
    /// Worker threads for the per-output fan-out (0 = all cores)
    pub n_jobs: usize,
    /// Trees per forest
    pub n_estimators: usize,
    /// Maximum tree depth (unbounded when absent)
    pub max_depth: Option<usize>,
    /// Share of rows held out for validation
    pub validation_fraction: f64,
    /// Seed for the split and the forest bootstrap
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            model_kind: ModelKind::Accurate,
            n_jobs: 0,
            n_estimators: 15,
            max_depth: None,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

impl TrainerConfig {
    /// Linear models for quick iteration
    pub fn fast() -> Self {
        Self {
            model_kind: ModelKind::Fast,
            ..Default::default()
        }
    }
}

/// An output variable that could not be trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingFailure {
    pub output_variable: OutputVariable,
    pub reason: String,
}

/// Which output variables trained and which failed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub trained: Vec<OutputVariable>,
    pub failed: Vec<TrainingFailure>,
}

impl TrainingReport {
    /// Every requested output variable trained
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Models produced by a training run, plus its report
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub models: BTreeMap<OutputVariable, (TrainedModel, ModelMetadata)>,
    pub report: TrainingReport,
}

/// Fits one regressor per output variable
pub struct ModelTrainer {
    config: TrainerConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        info!(
            "Creating model trainer: kind={}, n_jobs={}, seed={}",
            config.model_kind, config.n_jobs, config.seed
        );
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train every requested output variable against the canonical features.
    ///
    /// The dataset must already carry the engineered columns. A missing
    /// feature column fails the whole run; a missing or constant target only
    /// fails its own output variable.
    pub fn train(
        &self,
        dataset: &Dataset,
        outputs: &[OutputVariable],
    ) -> Result<TrainingOutcome, TrainingError> {
        let start = Instant::now();
        let x = feature_matrix(dataset)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.n_jobs)
            .build()
            .map_err(|e| TrainingError::ThreadPool(e.to_string()))?;

        info!(
            "Training {} model(s) on {} rows with {} threads",
            outputs.len(),
            dataset.len(),
            pool.current_num_threads()
        );

        let results: Vec<(OutputVariable, Result<(TrainedModel, ModelMetadata), TrainingError>)> =
            pool.install(|| {
                outputs
                    .par_iter()
                    .map(|&output| (output, self.train_single(dataset, &x, output)))
                    .collect()
            });

        let mut models = BTreeMap::new();
        let mut report = TrainingReport::default();
        for (output, result) in results {
            match result {
                Ok(pair) => {
                    report.trained.push(output);
                    models.insert(output, pair);
                }
                Err(e) => {
                    warn!("Training failed for {}: {}", output, e);
                    report.failed.push(TrainingFailure {
                        output_variable: output,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Training finished in {:.1}s: {} trained, {} failed",
            start.elapsed().as_secs_f64(),
            report.trained.len(),
            report.failed.len()
        );
        Ok(TrainingOutcome { models, report })
    }

    fn train_single(
        &self,
        dataset: &Dataset,
        x: &Array2<f64>,
        output: OutputVariable,
    ) -> Result<(TrainedModel, ModelMetadata), TrainingError> {
        let start = Instant::now();
        info!("Training model for {}...", output);

        let target = dataset
            .column(output.as_str())
            .ok_or_else(|| TrainingError::MissingTarget(output.to_string()))?;
        let y: Array1<f64> = target.iter().map(|v| if v.is_finite() { *v } else { 0.0 }).collect();

        let first = y.get(0).copied().unwrap_or(0.0);
        if y.iter().all(|v| *v == first) {
            return Err(TrainingError::ZeroVariance(output.to_string()));
        }

        let split = train_validation_split(y.len(), self.config.validation_fraction, self.config.seed)?;
        let x_train = x.select(ndarray::Axis(0), &split.train);
        let y_train = y.select(ndarray::Axis(0), &split.train);

        let regressor = match self.config.model_kind {
            ModelKind::Fast => Regressor::Linear(LinearRegressor::fit(&x_train, &y_train)?),
            ModelKind::Accurate => Regressor::Forest(
                RandomForestRegressor::new(self.config.n_estimators, self.config.seed)
                    .with_max_depth(self.config.max_depth)
                    .fit(&x_train, &y_train)?,
            ),
        };

        let y_true: Vec<f64> = split.validation.iter().map(|&i| y[i]).collect();
        let y_pred: Vec<f64> = split
            .validation
            .iter()
            .map(|&i| regressor.predict_row(x.row(i).as_slice().unwrap_or(&[])))
            .collect();
        let r2 = r2_score(&y_true, &y_pred);
        let mae = mean_absolute_error(&y_true, &y_pred);

        let duration = start.elapsed().as_secs_f64();
        info!(
            "Completed {} in {:.1}s (R²={:.3}, MAE={:.4})",
            output, duration, r2, mae
        );

        let metadata = ModelMetadata {
            trained_at: Utc::now(),
            feature_names: feature_names().iter().map(|s| s.to_string()).collect(),
            output_variable: output,
            validation_metric: ValidationMetric {
                metric: MetricKind::R2,
                value: r2,
            },
            model_kind: self.config.model_kind,
            training_samples: split.train.len(),
            validation_samples: split.validation.len(),
            training_duration_secs: duration,
        };

        Ok((TrainedModel::new(output, regressor), metadata))
    }
}

/// Row-major matrix of the canonical features; NaN cells become 0.
fn feature_matrix(dataset: &Dataset) -> Result<Array2<f64>, TrainingError> {
    let names = feature_names();
    let missing: Vec<String> = names
        .iter()
        .filter(|n| !dataset.has_column(n))
        .map(|n| n.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TrainingError::MissingFeatures(missing));
    }

    let columns: Vec<&[f64]> = names.iter().filter_map(|n| dataset.column(n)).collect();
    Ok(Array2::from_shape_fn((dataset.len(), names.len()), |(r, c)| {
        let v = columns[c][r];
        if v.is_finite() {
            v
        } else {
            0.0
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_engine::{derive_dataset, raw_parameter_names};

    /// Synthetic dataset with tire wear driven mostly by speed × brake
    fn synthetic_dataset(rows: usize) -> Dataset {
        let mut columns: Vec<(String, Vec<f64>)> = raw_parameter_names()
            .iter()
            .enumerate()
            .map(|(c, name)| {
                let values = (0..rows)
                    .map(|r| ((r * (c + 3) + c * 11) % 17) as f64 + c as f64)
                    .collect();
                (name.to_string(), values)
            })
            .collect();

        let speed = columns[2].1.clone();
        let brake = columns[1].1.clone();
        let wear: Vec<f64> = speed.iter().zip(&brake).map(|(s, b)| 0.01 * s * b + 0.1 * s).collect();
        let degradation: Vec<f64> = speed.iter().map(|s| 100.0 - 0.4 * s).collect();
        columns.push(("tire_wear".to_string(), wear));
        columns.push(("tire_degradation".to_string(), degradation));

        derive_dataset(&Dataset::from_columns(columns).unwrap()).unwrap()
    }

    #[test]
    fn test_train_fast_models() {
        let dataset = synthetic_dataset(200);
        let trainer = ModelTrainer::new(TrainerConfig::fast());
        let outcome = trainer
            .train(&dataset, &[OutputVariable::TireWear, OutputVariable::TireDegradation])
            .unwrap();

        assert!(outcome.report.is_complete());
        let (model, metadata) = &outcome.models[&OutputVariable::TireDegradation];
        assert_eq!(model.kind(), ModelKind::Fast);
        assert_eq!(metadata.feature_names.len(), feature_names().len());
        assert_eq!(metadata.validation_metric.metric, MetricKind::R2);
        assert!(metadata.validation_metric.value > 0.99);
        assert_eq!(metadata.training_samples + metadata.validation_samples, 200);
    }

    #[test]
    fn test_train_accurate_is_deterministic() {
        let dataset = synthetic_dataset(120);
        let config = TrainerConfig {
            n_estimators: 5,
            ..Default::default()
        };
        let a = ModelTrainer::new(config.clone()).train(&dataset, &[OutputVariable::TireWear]).unwrap();
        let b = ModelTrainer::new(config).train(&dataset, &[OutputVariable::TireWear]).unwrap();

        let (model_a, meta_a) = &a.models[&OutputVariable::TireWear];
        let (model_b, meta_b) = &b.models[&OutputVariable::TireWear];
        assert_eq!(model_a, model_b);
        assert_eq!(meta_a.validation_metric, meta_b.validation_metric);
        assert_eq!(model_a.kind(), ModelKind::Accurate);
    }

    #[test]
    fn test_failure_isolation() {
        let mut dataset = synthetic_dataset(100);
        dataset.push_column("cumulative_tire_wear", vec![3.0; 100]).unwrap();

        let outcome = ModelTrainer::new(TrainerConfig::fast())
            .train(&dataset, &OutputVariable::ALL)
            .unwrap();

        assert_eq!(
            outcome.report.trained,
            vec![OutputVariable::TireWear, OutputVariable::TireDegradation]
        );
        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(
            outcome.report.failed[0].output_variable,
            OutputVariable::CumulativeTireWear
        );
        assert!(outcome.report.failed[0].reason.contains("zero variance"));
        assert!(!outcome.models.contains_key(&OutputVariable::CumulativeTireWear));
    }

    #[test]
    fn test_missing_target_is_per_output() {
        let dataset = synthetic_dataset(50);
        let outcome = ModelTrainer::new(TrainerConfig::fast())
            .train(&dataset, &[OutputVariable::CumulativeTireWear, OutputVariable::TireWear])
            .unwrap();

        assert_eq!(outcome.report.trained, vec![OutputVariable::TireWear]);
        assert!(outcome.report.failed[0].reason.contains("absent"));
    }

    #[test]
    fn test_missing_features_fail_run() {
        let dataset = Dataset::from_columns([("tire_wear", vec![1.0, 2.0, 3.0])]).unwrap();
        let err = ModelTrainer::new(TrainerConfig::default())
            .train(&dataset, &[OutputVariable::TireWear])
            .unwrap_err();
        assert!(matches!(err, TrainingError::MissingFeatures(_)));
    }
}
