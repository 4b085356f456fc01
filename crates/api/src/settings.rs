//! Application configuration
//!
//! Read from an optional `config/default.toml` and then from `TIRE__*`
//! environment variables, e.g. `TIRE__TRAINING__MODEL_KIND=fast` or
//! `TIRE__API__PORT=8080`.

use config::{Config, ConfigError, Environment, File};
use model_trainer::{ModelKind, TrainerConfig};
use prediction_service::ServiceConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dataset: DatasetSettings,
    pub training: TrainingSettings,
    pub store: StoreSettings,
    pub prediction: PredictionSettings,
    pub api: ApiSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    /// CSV file with the simulated tire dataset
    pub source: PathBuf,
    /// Development sampling; 1.0 trains on every row
    pub sample_fraction: f64,
    pub seed: u64,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            source: PathBuf::from("simulated_dataset.csv"),
            sample_fraction: 0.05,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub model_kind: ModelKind,
    pub n_jobs: usize,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub validation_fraction: f64,
    pub seed: u64,
    pub timeout_secs: Option<u64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let trainer = TrainerConfig::default();
        Self {
            model_kind: trainer.model_kind,
            n_jobs: trainer.n_jobs,
            n_estimators: trainer.n_estimators,
            max_depth: trainer.max_depth,
            validation_fraction: trainer.validation_fraction,
            seed: trainer.seed,
            timeout_secs: None,
        }
    }
}

impl TrainingSettings {
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            model_kind: self.model_kind,
            n_jobs: self.n_jobs,
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            validation_fraction: self.validation_fraction,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub models_dir: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("saved_models"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    pub clamp_to_range: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
    /// `*` allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ApiSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load `config/default.toml` (if present) overlaid with the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/default")
    }

    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("TIRE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            sample_fraction: self.dataset.sample_fraction,
            sample_seed: self.dataset.seed,
            trainer: self.training.trainer_config(),
            timeout: self.training.timeout_secs.map(Duration::from_secs),
            clamp_to_range: self.prediction.clamp_to_range,
        }
    }
}
