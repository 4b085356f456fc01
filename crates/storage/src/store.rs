//! Filesystem model store
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/feature_ranges.json
//! <root>/correlations.json
//! <root>/<output_variable>/model.bin      (postcard)
//! <root>/<output_variable>/metadata.json
//! ```
//!
//! Each output directory is staged in a hidden temp directory and renamed
//! into place, so a reader sees either the previous artifact pair or the new
//! one. Entries starting with `.` are staging leftovers and are ignored.

use crate::StorageError;
use feature_engine::{
    feature_names, raw_parameter_names, Correlations, FeatureRanges, OutputVariable,
};
use model_trainer::{ModelMetadata, TrainedModel};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const MODEL_FILE: &str = "model.bin";
pub const METADATA_FILE: &str = "metadata.json";
pub const RANGES_FILE: &str = "feature_ranges.json";
pub const CORRELATIONS_FILE: &str = "correlations.json";

/// Everything a previous training run persisted
#[derive(Debug, Clone)]
pub struct StoredModels {
    pub models: BTreeMap<OutputVariable, (TrainedModel, ModelMetadata)>,
    pub ranges: FeatureRanges,
    pub correlations: Correlations,
}

/// Model artifacts rooted at one directory
pub struct ModelStore {
    root: PathBuf,
    /// Serializes writers within this process
    write_lock: Mutex<()>,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!("Creating model store at {}", root.display());
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether any output directory exists, readable or not
    pub fn has_artifacts(&self) -> bool {
        self.artifact_dirs().map(|dirs| !dirs.is_empty()).unwrap_or(false)
    }

    /// Persist feature ranges, correlations and every model.
    ///
    /// Dataset summaries are written first: a crash part-way leaves either
    /// no models (never trained) or models next to their summaries.
    pub fn save(
        &self,
        models: &BTreeMap<OutputVariable, (TrainedModel, ModelMetadata)>,
        ranges: &FeatureRanges,
        correlations: &Correlations,
    ) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?;

        fs::create_dir_all(&self.root).map_err(|e| StorageError::io(&self.root, e))?;
        self.write_json(RANGES_FILE, ranges)?;
        self.write_json(CORRELATIONS_FILE, correlations)?;
        for (output, (model, metadata)) in models {
            self.write_model(*output, model, metadata)?;
        }

        info!(
            "Saved {} model(s) and {} feature ranges to {}",
            models.len(),
            ranges.len(),
            self.root.display()
        );
        Ok(())
    }

    fn write_json<T: serde::Serialize>(&self, file: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".summary-")
            .tempfile_in(&self.root)
            .map_err(|e| StorageError::io(&self.root, e))?;
        tmp.write_all(&json).map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StorageError::io(tmp.path(), e))?;

        let target = self.root.join(file);
        tmp.persist(&target)
            .map_err(|e| StorageError::io(&target, e.error))?;
        Ok(())
    }

    fn write_model(
        &self,
        output: OutputVariable,
        model: &TrainedModel,
        metadata: &ModelMetadata,
    ) -> Result<(), StorageError> {
        if model.output_variable() != output || metadata.output_variable != output {
            return Err(StorageError::SerializationError(format!(
                "refusing to store {} model under {}",
                model.output_variable(),
                output
            )));
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)
            .map_err(|e| StorageError::io(&self.root, e))?;

        let bytes = postcard::to_allocvec(model)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        write_synced(&staging.path().join(MODEL_FILE), &bytes)?;

        let json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        write_synced(&staging.path().join(METADATA_FILE), &json)?;

        let target = self.root.join(output.as_str());
        if target.exists() {
            // Park the previous pair so the rename below never hits a non-empty dir
            let trash = tempfile::Builder::new()
                .prefix(".replaced-")
                .tempdir_in(&self.root)
                .map_err(|e| StorageError::io(&self.root, e))?;
            let parked = trash.path().join(output.as_str());
            fs::rename(&target, &parked).map_err(|e| StorageError::io(&target, e))?;
            fs::rename(staging.path(), &target).map_err(|e| StorageError::io(&target, e))?;
            debug!("Replaced artifacts for {}", output);
        } else {
            fs::rename(staging.path(), &target).map_err(|e| StorageError::io(&target, e))?;
            debug!("Created artifacts for {}", output);
        }
        Ok(())
    }

    /// Load every persisted model with its metadata and the feature ranges.
    ///
    /// An absent or empty store is [`StorageError::NeverTrained`]. Anything
    /// present but unusable is reported, never skipped.
    pub fn load(&self) -> Result<StoredModels, StorageError> {
        let dirs = self.artifact_dirs()?;
        if dirs.is_empty() {
            return Err(StorageError::NeverTrained(self.root.display().to_string()));
        }

        let ranges = self.read_ranges()?;
        let correlations = self.read_correlations()?;
        let mut models = BTreeMap::new();
        for (name, dir) in dirs {
            let output = OutputVariable::from_name(&name)
                .ok_or_else(|| StorageError::corruption(&dir, "unknown output variable"))?;
            let pair = read_model_dir(output, &dir)?;
            models.insert(output, pair);
        }

        info!("Loaded {} model(s) from {}", models.len(), self.root.display());
        Ok(StoredModels {
            models,
            ranges,
            correlations,
        })
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        file: &str,
        what: &str,
    ) -> Result<T, StorageError> {
        let path = self.root.join(file);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::corruption(&path, format!("{} missing", what)));
            }
            Err(e) => return Err(StorageError::io(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| StorageError::corruption(&path, e.to_string()))
    }

    fn read_correlations(&self) -> Result<Correlations, StorageError> {
        self.read_json(CORRELATIONS_FILE, "correlations")
    }

    fn read_ranges(&self) -> Result<FeatureRanges, StorageError> {
        let ranges: FeatureRanges = self.read_json(RANGES_FILE, "feature ranges")?;
        let path = self.root.join(RANGES_FILE);

        let missing: Vec<&str> = raw_parameter_names()
            .iter()
            .copied()
            .filter(|name| !ranges.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::corruption(
                &path,
                format!("no range for {}", missing.join(", ")),
            ));
        }
        Ok(ranges)
    }

    /// Non-hidden subdirectories of the root, sorted by name
    fn artifact_dirs(&self) -> Result<Vec<(String, PathBuf)>, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                dirs.push((name, path));
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut file = fs::File::create(path).map_err(|e| StorageError::io(path, e))?;
    file.write_all(bytes).map_err(|e| StorageError::io(path, e))?;
    file.sync_all().map_err(|e| StorageError::io(path, e))
}

fn read_model_dir(
    output: OutputVariable,
    dir: &Path,
) -> Result<(TrainedModel, ModelMetadata), StorageError> {
    let model_path = dir.join(MODEL_FILE);
    let metadata_path = dir.join(METADATA_FILE);

    let read = |path: &Path| match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StorageError::corruption(path, "file missing"))
        }
        Err(e) => Err(StorageError::io(path, e)),
    };

    let model: TrainedModel = postcard::from_bytes(&read(&model_path)?)
        .map_err(|e| StorageError::corruption(&model_path, e.to_string()))?;
    let metadata: ModelMetadata = serde_json::from_slice(&read(&metadata_path)?)
        .map_err(|e| StorageError::corruption(&metadata_path, e.to_string()))?;

    if model.output_variable() != output {
        return Err(StorageError::corruption(
            &model_path,
            format!("holds a {} model", model.output_variable()),
        ));
    }
    if metadata.output_variable != output {
        return Err(StorageError::corruption(
            &metadata_path,
            format!("describes {}", metadata.output_variable),
        ));
    }
    if metadata.model_kind != model.kind() {
        return Err(StorageError::corruption(
            &metadata_path,
            format!("model kind {} does not match {}", metadata.model_kind, model.kind()),
        ));
    }

    let expected = feature_names();
    if metadata.feature_names.is_empty() || metadata.feature_names != expected {
        warn!("Stored feature list for {} differs from the current one", output);
        return Err(StorageError::FeatureMismatch {
            output: output.to_string(),
            stored: metadata.feature_names.join(", "),
            expected: expected.join(", "),
        });
    }

    // The metadata can be intact while the regressor beside it is not
    model
        .regressor()
        .check_structure(metadata.feature_names.len())
        .map_err(|reason| StorageError::corruption(&model_path, reason))?;

    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_engine::{correlation_matrix, derive_dataset, summarize, Dataset};
    use model_trainer::{LinearRegressor, ModelTrainer, Regressor, TrainerConfig};
    use tempfile::TempDir;

    fn trained() -> StoredModels {
        let rows = 60;
        let mut columns: Vec<(String, Vec<f64>)> = raw_parameter_names()
            .iter()
            .enumerate()
            .map(|(c, name)| {
                let values = (0..rows).map(|r| ((r * (c + 2)) % 13) as f64 + c as f64).collect();
                (name.to_string(), values)
            })
            .collect();
        let wear: Vec<f64> = (0..rows).map(|r| r as f64 * 0.5).collect();
        let degradation: Vec<f64> = (0..rows).map(|r| 100.0 - (r % 9) as f64).collect();
        columns.push(("tire_wear".to_string(), wear));
        columns.push(("tire_degradation".to_string(), degradation));

        let dataset = derive_dataset(&Dataset::from_columns(columns).unwrap()).unwrap();
        let outcome = ModelTrainer::new(TrainerConfig::fast())
            .train(&dataset, &[OutputVariable::TireWear, OutputVariable::TireDegradation])
            .unwrap();
        StoredModels {
            models: outcome.models,
            ranges: summarize(&dataset),
            correlations: correlation_matrix(&dataset),
        }
    }

    #[test]
    fn test_missing_root_is_never_trained() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path().join("models"));

        assert!(!store.has_artifacts());
        assert!(matches!(store.load(), Err(StorageError::NeverTrained(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let saved = trained();

        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.ranges, saved.ranges);
        assert_eq!(loaded.correlations, saved.correlations);
        assert_eq!(loaded.models.len(), 2);
        for (output, (model, metadata)) in &saved.models {
            let (loaded_model, loaded_metadata) = &loaded.models[output];
            assert_eq!(loaded_model, model);
            assert_eq!(loaded_metadata, metadata);
        }
        assert!(dir.path().join("tire_wear").join(MODEL_FILE).is_file());
    }

    #[test]
    fn test_overwrite_replaces_pair_and_leaves_no_staging() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let saved = trained();

        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();
        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();

        let hidden: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(hidden.is_empty());
        assert_eq!(store.load().unwrap().models.len(), 2);
    }

    #[test]
    fn test_hidden_staging_dirs_ignored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".staging-abc")).unwrap();
        let store = ModelStore::new(dir.path());

        assert!(matches!(store.load(), Err(StorageError::NeverTrained(_))));
    }

    #[test]
    fn test_truncated_model_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let saved = trained();
        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();

        fs::write(dir.path().join("tire_wear").join(MODEL_FILE), [1u8, 2, 3]).unwrap();

        match store.load() {
            Err(StorageError::Corruption { path, .. }) => assert!(path.ends_with(MODEL_FILE)),
            other => panic!("expected corruption, got {:?}", other.map(|m| m.models.len())),
        }
    }

    #[test]
    fn test_orphan_metadata_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let saved = trained();
        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();

        fs::remove_file(dir.path().join("tire_degradation").join(MODEL_FILE)).unwrap();

        assert!(matches!(store.load(), Err(StorageError::Corruption { .. })));
    }

    #[test]
    fn test_missing_ranges_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let saved = trained();
        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();

        fs::remove_file(dir.path().join(RANGES_FILE)).unwrap();

        assert!(matches!(store.load(), Err(StorageError::Corruption { .. })));
    }

    #[test]
    fn test_feature_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let mut saved = trained();
        for (_, metadata) in saved.models.values_mut() {
            metadata.feature_names.reverse();
        }
        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();

        assert!(matches!(
            store.load(),
            Err(StorageError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_output_directory_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let saved = trained();
        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();

        fs::create_dir(dir.path().join("brake_wear")).unwrap();

        assert!(matches!(store.load(), Err(StorageError::Corruption { .. })));
    }

    #[test]
    fn test_missing_correlations_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let saved = trained();
        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();

        fs::remove_file(dir.path().join(CORRELATIONS_FILE)).unwrap();

        match store.load() {
            Err(StorageError::Corruption { path, .. }) => assert!(path.ends_with(CORRELATIONS_FILE)),
            other => panic!("expected corruption, got {:?}", other.map(|m| m.models.len())),
        }
    }

    #[test]
    fn test_regressor_width_must_match_metadata() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let mut saved = trained();

        // genuine ten-feature metadata next to a one-column regressor
        let narrow = LinearRegressor::fit(
            &ndarray::array![[0.0], [1.0], [2.0], [3.0]],
            &ndarray::array![0.0, 2.0, 4.0, 6.0],
        )
        .unwrap();
        let (model, metadata) = saved.models.get_mut(&OutputVariable::TireWear).unwrap();
        assert_eq!(metadata.feature_names.len(), feature_names().len());
        *model = TrainedModel::new(OutputVariable::TireWear, Regressor::Linear(narrow));
        store.save(&saved.models, &saved.ranges, &saved.correlations).unwrap();

        match store.load() {
            Err(StorageError::Corruption { path, reason }) => {
                assert!(path.ends_with(MODEL_FILE));
                assert!(reason.contains("expects 1 features"), "{}", reason);
            }
            other => panic!("expected corruption, got {:?}", other.map(|m| m.models.len())),
        }
    }
}
