//! Prediction service state machine

use crate::analysis::{
    correlation_report, impact_report, CorrelationReport, DrivingScenario, ImpactReport,
    ScenarioPrediction,
};
use crate::ServiceError;
use feature_engine::{
    correlation_matrix, derive_dataset, feature_names, summarize, Correlations, DatasetSource,
    FeatureError, FeatureRanges, FeatureVector, OutputVariable, RawParameter, RAW_DIMENSION,
};
use model_trainer::{
    ModelMetadata, ModelTrainer, TrainedModel, TrainerConfig, TrainingError, TrainingOutcome,
    TrainingReport,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{ModelStore, StorageError, StoredModels};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Partial mapping from raw parameter name to value
pub type ParameterRequest = BTreeMap<String, f64>;

/// One predicted value per loaded model
pub type PredictionResult = BTreeMap<OutputVariable, f64>;

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Share of rows kept for training on large datasets (1.0 = all)
    pub sample_fraction: f64,
    pub sample_seed: u64,
    pub trainer: TrainerConfig,
    /// Upper bound on a training pass
    pub timeout: Option<Duration>,
    /// Clamp request values to the training ranges
    pub clamp_to_range: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sample_fraction: 1.0,
            sample_seed: 42,
            trainer: TrainerConfig::default(),
            timeout: None,
            clamp_to_range: false,
        }
    }
}

/// Immutable models shared with every in-flight prediction
#[derive(Debug)]
pub struct LoadedModels {
    models: BTreeMap<OutputVariable, (TrainedModel, ModelMetadata)>,
    ranges: FeatureRanges,
    correlations: Correlations,
    /// Present when the models were trained by this process
    report: Option<TrainingReport>,
}

impl LoadedModels {
    fn initialization(&self) -> Initialization {
        Initialization {
            feature_ranges: self.ranges.clone(),
            training: self.report.clone(),
            metadata: self
                .models
                .iter()
                .map(|(output, (_, metadata))| (*output, metadata.clone()))
                .collect(),
        }
    }
}

/// Lifecycle state of the service
#[derive(Debug, Clone)]
pub enum ServiceState {
    Uninitialized,
    Ready(Arc<LoadedModels>),
    Failed(ServiceError),
}

impl ServiceState {
    pub fn kind(&self) -> StateKind {
        match self {
            ServiceState::Uninitialized => StateKind::Uninitialized,
            ServiceState::Ready(_) => StateKind::Ready,
            ServiceState::Failed(_) => StateKind::Failed,
        }
    }
}

/// State name without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Uninitialized,
    Ready,
    Failed,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Uninitialized => "uninitialized",
            StateKind::Ready => "ready",
            StateKind::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Health snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub state: StateKind,
    pub trained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a successful initialization
#[derive(Debug, Clone, Serialize)]
pub struct Initialization {
    pub feature_ranges: FeatureRanges,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingReport>,
    pub metadata: BTreeMap<OutputVariable, ModelMetadata>,
}

/// Output of the blocking training pipeline
struct TrainingRun {
    outcome: TrainingOutcome,
    ranges: FeatureRanges,
    correlations: Correlations,
}

/// Training pass still running on the blocking pool
struct PendingTraining {
    handle: JoinHandle<Result<TrainingRun, ServiceError>>,
    started: Instant,
}

/// Lazily initialized predictor
pub struct PredictionService {
    config: ServiceConfig,
    source: Arc<dyn DatasetSource>,
    store: Arc<ModelStore>,
    state: RwLock<ServiceState>,
    /// Held for the duration of an initialize pass. Keeps a training pass
    /// that outlived its timeout so the next pass resumes it.
    init_lock: Mutex<Option<PendingTraining>>,
}

impl PredictionService {
    pub fn new(config: ServiceConfig, source: Arc<dyn DatasetSource>, store: ModelStore) -> Self {
        info!(
            "Creating prediction service: dataset={}, store={}, kind={}",
            source.describe(),
            store.root().display(),
            config.trainer.model_kind
        );
        Self {
            config,
            source,
            store: Arc::new(store),
            state: RwLock::new(ServiceState::Uninitialized),
            init_lock: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Load persisted models, or train and persist them on first run.
    ///
    /// Only one pass runs at a time; callers arriving while a pass is in
    /// flight wait for it and then see its outcome. A store that holds
    /// artifacts which cannot be used is never trained over. Training cut
    /// off by the timeout keeps running and is awaited again by the next
    /// call rather than started a second time.
    pub async fn initialize(&self) -> Result<Initialization, ServiceError> {
        let mut pending = self.init_lock.lock().await;

        let previous = self.state.read().await.clone();
        if let ServiceState::Ready(loaded) = &previous {
            debug!("Already initialized");
            return Ok(loaded.initialization());
        }

        match self.run_initialization(&mut pending).await {
            Ok(loaded) => {
                let loaded = Arc::new(loaded);
                *self.state.write().await = ServiceState::Ready(loaded.clone());
                info!("Prediction service ready with {} model(s)", loaded.models.len());
                Ok(loaded.initialization())
            }
            Err(ServiceError::Timeout(ms)) => {
                warn!("Initialization timed out after {}ms, state left as {}", ms, previous.kind());
                Err(ServiceError::Timeout(ms))
            }
            Err(e) => {
                error!("Initialization failed: {}", e);
                *self.state.write().await = ServiceState::Failed(e.clone());
                Err(e)
            }
        }
    }

    async fn run_initialization(
        &self,
        pending: &mut Option<PendingTraining>,
    ) -> Result<LoadedModels, ServiceError> {
        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        match loaded {
            Ok(StoredModels {
                models,
                ranges,
                correlations,
            }) => {
                if pending.take().is_some() {
                    warn!("Store populated elsewhere, discarding the unfinished training pass");
                }
                Ok(LoadedModels {
                    models,
                    ranges,
                    correlations,
                    report: None,
                })
            }
            Err(StorageError::NeverTrained(dir)) => {
                info!("No models in {}, training from {}", dir, self.source.describe());
                self.train_and_save(pending).await
            }
            Err(e) => Err(store_error(e)),
        }
    }

    async fn train_and_save(
        &self,
        pending: &mut Option<PendingTraining>,
    ) -> Result<LoadedModels, ServiceError> {
        let mut training = match pending.take() {
            Some(training) => {
                info!(
                    "Resuming training pass started {:.1}s ago",
                    training.started.elapsed().as_secs_f64()
                );
                training
            }
            None => {
                let source = self.source.clone();
                let config = self.config.clone();
                PendingTraining {
                    handle: tokio::task::spawn_blocking(move || train(source.as_ref(), &config)),
                    started: Instant::now(),
                }
            }
        };

        // On expiry the pass is parked, not cancelled; nothing is saved yet
        let joined = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut training.handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    *pending = Some(training);
                    return Err(ServiceError::Timeout(limit.as_millis() as u64));
                }
            },
            None => (&mut training.handle).await,
        };
        let TrainingRun {
            outcome,
            ranges,
            correlations,
        } = joined.map_err(|e| ServiceError::Internal(e.to_string()))??;

        metrics::counter!("training_runs_total").increment(1);
        metrics::histogram!("training_seconds").record(training.started.elapsed().as_secs_f64());

        if outcome.models.is_empty() {
            let reasons: Vec<String> = outcome
                .report
                .failed
                .iter()
                .map(|f| format!("{}: {}", f.output_variable, f.reason))
                .collect();
            return Err(ServiceError::Training(reasons.join("; ")));
        }

        let store = self.store.clone();
        let models = outcome.models;
        let (models, ranges, correlations) = tokio::task::spawn_blocking(move || {
            store
                .save(&models, &ranges, &correlations)
                .map(|_| (models, ranges, correlations))
        })
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?
        .map_err(store_error)?;

        Ok(LoadedModels {
            models,
            ranges,
            correlations,
            report: Some(outcome.report),
        })
    }

    async fn ready_models(&self) -> Result<Arc<LoadedModels>, ServiceError> {
        match &*self.state.read().await {
            ServiceState::Ready(loaded) => Ok(loaded.clone()),
            other => Err(ServiceError::NotReady(other.kind())),
        }
    }

    /// Predict every output variable from a partial raw-parameter request.
    ///
    /// Unknown keys and non-finite values reject the whole request; absent
    /// parameters take their training median.
    pub async fn predict(&self, request: &ParameterRequest) -> Result<PredictionResult, ServiceError> {
        let result = self.predict_inner(request).await;
        match &result {
            Ok(_) => metrics::counter!("predictions_total").increment(1),
            Err(e) => {
                metrics::counter!("prediction_errors_total", "kind" => e.kind()).increment(1)
            }
        }
        result
    }

    async fn predict_inner(&self, request: &ParameterRequest) -> Result<PredictionResult, ServiceError> {
        let loaded = self.ready_models().await?;
        let features = self.complete_features(&loaded, request)?;
        predict_all(&loaded, &features)
    }

    /// The completed feature vector `predict` would use for `request`
    pub async fn feature_vector(&self, request: &ParameterRequest) -> Result<FeatureVector, ServiceError> {
        let loaded = self.ready_models().await?;
        self.complete_features(&loaded, request)
    }

    fn complete_features(
        &self,
        loaded: &LoadedModels,
        request: &ParameterRequest,
    ) -> Result<FeatureVector, ServiceError> {
        validate_request(request)?;

        let mut raw = [0.0; RAW_DIMENSION];
        for parameter in RawParameter::ALL {
            let range = loaded.ranges.get(parameter.as_str()).ok_or_else(|| {
                ServiceError::Internal(format!("no stored range for {}", parameter))
            })?;
            raw[parameter.index()] = match request.get(parameter.as_str()) {
                Some(&value) if self.config.clamp_to_range => range.clamp(value),
                Some(&value) => value,
                None => range.median,
            };
        }
        Ok(FeatureVector::from_raw(raw))
    }

    pub async fn health(&self) -> Health {
        let state = self.state.read().await;
        Health {
            state: state.kind(),
            trained: matches!(*state, ServiceState::Ready(_)),
            error: match &*state {
                ServiceState::Failed(e) => Some(e.to_string()),
                _ => None,
            },
        }
    }

    /// Effect of shifting one parameter away from its median on every output
    pub async fn analyze_impact(&self, parameter: &str, change: f64) -> Result<ImpactReport, ServiceError> {
        let parameter = RawParameter::from_name(parameter)
            .ok_or_else(|| ServiceError::UnknownParameter(parameter.to_string()))?;
        if !change.is_finite() {
            return Err(ServiceError::InvalidValue {
                name: "change".to_string(),
                value: change.to_string(),
            });
        }

        let loaded = self.ready_models().await?;
        let baseline = predict_all(&loaded, &self.complete_features(&loaded, &ParameterRequest::new())?)?;

        let median = loaded
            .ranges
            .get(parameter.as_str())
            .map(|r| r.median)
            .ok_or_else(|| ServiceError::Internal(format!("no stored range for {}", parameter)))?;
        let mut shifted = ParameterRequest::new();
        shifted.insert(parameter.as_str().to_string(), median + change);
        let modified = predict_all(&loaded, &self.complete_features(&loaded, &shifted)?)?;

        Ok(impact_report(parameter, change, &baseline, &modified))
    }

    /// Training-data correlations of one feature or output column with
    /// every other column, strongest first
    pub async fn correlations(&self, parameter: &str) -> Result<CorrelationReport, ServiceError> {
        let known = feature_names().iter().any(|name| *name == parameter)
            || OutputVariable::from_name(parameter).is_some();
        if !known {
            return Err(ServiceError::UnknownParameter(parameter.to_string()));
        }

        let loaded = self.ready_models().await?;
        Ok(correlation_report(parameter, loaded.correlations.get(parameter)))
    }

    /// Predictions for every preset driving scenario
    pub async fn scenarios(&self) -> Result<Vec<ScenarioPrediction>, ServiceError> {
        let loaded = self.ready_models().await?;
        DrivingScenario::presets()
            .iter()
            .map(|scenario| {
                let parameters = scenario.request();
                let features = self.complete_features(&loaded, &parameters)?;
                Ok(ScenarioPrediction {
                    name: scenario.name.to_string(),
                    parameters,
                    predictions: predict_all(&loaded, &features)?,
                })
            })
            .collect()
    }

    /// Metadata of every loaded model
    pub async fn metadata(&self) -> Result<BTreeMap<OutputVariable, ModelMetadata>, ServiceError> {
        let loaded = self.ready_models().await?;
        Ok(loaded.initialization().metadata)
    }

    /// Per-output feature importances, most important first
    pub async fn feature_importances(
        &self,
    ) -> Result<BTreeMap<OutputVariable, Vec<(String, f64)>>, ServiceError> {
        let loaded = self.ready_models().await?;
        Ok(loaded
            .models
            .iter()
            .map(|(output, (model, _))| {
                let pairs = model
                    .feature_importances()
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect();
                (*output, pairs)
            })
            .collect())
    }
}

fn validate_request(request: &ParameterRequest) -> Result<(), ServiceError> {
    for (name, value) in request {
        if RawParameter::from_name(name).is_none() {
            return Err(ServiceError::UnknownParameter(name.clone()));
        }
        if !value.is_finite() {
            return Err(ServiceError::InvalidValue {
                name: name.clone(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

fn predict_all(loaded: &LoadedModels, features: &FeatureVector) -> Result<PredictionResult, ServiceError> {
    loaded
        .models
        .iter()
        .map(|(output, (model, _))| {
            model
                .predict(features)
                .map(|value| (*output, value))
                .map_err(|e| ServiceError::Internal(e.to_string()))
        })
        .collect()
}

/// Blocking pipeline: load, sample, derive, summarize, train
fn train(source: &dyn DatasetSource, config: &ServiceConfig) -> Result<TrainingRun, ServiceError> {
    let raw = source.load().map_err(feature_error)?;
    let sampled = raw
        .sample(config.sample_fraction, config.sample_seed)
        .map_err(feature_error)?;
    let dataset = derive_dataset(&sampled).map_err(feature_error)?;
    let ranges = summarize(&dataset);

    let empty: Vec<&str> = RawParameter::ALL
        .iter()
        .map(RawParameter::as_str)
        .filter(|name| !ranges.contains_key(*name))
        .collect();
    if !empty.is_empty() {
        return Err(ServiceError::Configuration(format!(
            "no finite values for {}",
            empty.join(", ")
        )));
    }

    let outcome = ModelTrainer::new(config.trainer.clone())
        .train(&dataset, &OutputVariable::ALL)
        .map_err(|e| match e {
            TrainingError::MissingFeatures(_) | TrainingError::ThreadPool(_) => {
                ServiceError::Configuration(e.to_string())
            }
            other => ServiceError::Training(other.to_string()),
        })?;
    Ok(TrainingRun {
        outcome,
        ranges,
        correlations: correlation_matrix(&dataset),
    })
}

fn feature_error(e: FeatureError) -> ServiceError {
    ServiceError::Configuration(e.to_string())
}

fn store_error(e: StorageError) -> ServiceError {
    match e {
        StorageError::Corruption { .. } => ServiceError::StoreCorruption(e.to_string()),
        StorageError::FeatureMismatch { .. } => ServiceError::Configuration(e.to_string()),
        other => ServiceError::Internal(other.to_string()),
    }
}
