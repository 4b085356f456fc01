//! Column-oriented training dataset

use crate::features::OutputVariable;
use crate::FeatureError;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Datasets at or below this size are never sampled down
const SAMPLING_MIN_ROWS: usize = 1000;

/// Named `f64` columns of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Dataset {
    /// Create an empty dataset
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from `(name, values)` pairs
    pub fn from_columns<I, S>(columns: I) -> Result<Self, FeatureError>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut dataset = Self::new();
        for (name, values) in columns {
            dataset.push_column(name, values)?;
        }
        Ok(dataset)
    }

    /// Add a column, replacing any existing column with the same name
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), FeatureError> {
        let name = name.into();
        if !self.columns.is_empty() && values.len() != self.len() {
            return Err(FeatureError::ColumnLength {
                name,
                expected: self.len(),
                actual: values.len(),
            });
        }

        match self.names.iter().position(|n| *n == name) {
            Some(idx) => self.columns[idx] = values,
            None => {
                self.names.push(name);
                self.columns.push(values);
            }
        }
        Ok(())
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of a named column
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Dataset made of the given rows, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|col| indices.iter().map(|&i| col[i]).collect())
                .collect(),
        }
    }

    /// Random subset for development-speed training.
    ///
    /// Only datasets larger than 1000 rows are sampled; the subset keeps
    /// `floor(len * fraction)` rows picked with a seeded shuffle.
    pub fn sample(&self, fraction: f64, seed: u64) -> Result<Self, FeatureError> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(FeatureError::InvalidSampleFraction(fraction));
        }
        if fraction >= 1.0 || self.len() <= SAMPLING_MIN_ROWS {
            return Ok(self.clone());
        }

        let n = ((self.len() as f64 * fraction).floor() as usize).max(1);
        let mut indices: Vec<usize> = (0..self.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        indices.truncate(n);

        info!(
            "Development sampling: using {} of {} rows ({:.1}%)",
            n,
            self.len(),
            fraction * 100.0
        );
        Ok(self.select_rows(&indices))
    }

    /// Load a CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        Self::read_csv(file, &path.display().to_string())
    }

    /// Load CSV data from any reader.
    ///
    /// Output headers are normalized, empty cells become NaN and columns
    /// holding any non-numeric cell (e.g. `Driving_Style`) are dropped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, FeatureError> {
        Self::read_csv(reader, "<reader>")
    }

    fn read_csv<R: Read>(reader: R, source: &str) -> Result<Self, FeatureError> {
        let mut reader = csv::Reader::from_reader(reader);
        let csv_error = |e: csv::Error| FeatureError::Csv {
            path: source.to_string(),
            message: e.to_string(),
        };

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| match OutputVariable::from_column(h) {
                Some(output) => output.as_str().to_string(),
                None => h.trim().to_string(),
            })
            .collect();

        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
        let mut numeric = vec![true; headers.len()];

        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            for (idx, cell) in record.iter().enumerate().take(headers.len()) {
                if !numeric[idx] {
                    continue;
                }
                let cell = cell.trim();
                if cell.is_empty() {
                    columns[idx].push(f64::NAN);
                } else if let Ok(value) = cell.parse::<f64>() {
                    columns[idx].push(value);
                } else {
                    numeric[idx] = false;
                    columns[idx].clear();
                }
            }
        }

        let mut dataset = Self::new();
        for ((name, values), keep) in headers.into_iter().zip(columns).zip(numeric) {
            if keep {
                dataset.push_column(name, values)?;
            } else {
                debug!("Skipping non-numeric column {}", name);
            }
        }

        info!("Loaded {} rows, {} numeric columns from {}", dataset.len(), dataset.names.len(), source);
        Ok(dataset)
    }
}

/// Source of the raw training dataset
pub trait DatasetSource: Send + Sync {
    /// Load the full raw dataset
    fn load(&self) -> Result<Dataset, FeatureError>;

    /// Human readable identifier for logs
    fn describe(&self) -> String;
}

/// Dataset read from a local CSV file
#[derive(Debug, Clone)]
pub struct CsvDatasetSource {
    path: PathBuf,
}

impl CsvDatasetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatasetSource for CsvDatasetSource {
    fn load(&self) -> Result<Dataset, FeatureError> {
        Dataset::from_csv(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Dataset already held in memory
#[derive(Debug, Clone)]
pub struct InMemorySource {
    dataset: Dataset,
}

impl InMemorySource {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }
}

impl DatasetSource for InMemorySource {
    fn load(&self) -> Result<Dataset, FeatureError> {
        Ok(self.dataset.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory ({} rows)", self.dataset.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
Speed,Throttle,Driving_Style,Tire degreadation,cumilative_Tire_Wear
120,0.7,Normal,0.5,1.0
180,,Aggressive,0.6,1.5
80,0.5,Careful,0.4,2.0
";

    #[test]
    fn test_csv_loading() {
        let dataset = Dataset::from_reader(CSV.as_bytes()).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.column("Speed").unwrap(), &[120.0, 180.0, 80.0]);
        assert!(dataset.column("Throttle").unwrap()[1].is_nan());
        assert!(!dataset.has_column("Driving_Style"));
        assert!(dataset.has_column("tire_degradation"));
        assert!(dataset.has_column("cumulative_tire_wear"));
    }

    #[test]
    fn test_column_length_mismatch() {
        let mut dataset = Dataset::from_columns([("a", vec![1.0, 2.0])]).unwrap();
        let err = dataset.push_column("b", vec![1.0]).unwrap_err();
        assert!(matches!(err, FeatureError::ColumnLength { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_small_dataset_not_sampled() {
        let dataset = Dataset::from_columns([("a", (0..100).map(f64::from).collect())]).unwrap();
        let sampled = dataset.sample(0.05, 42).unwrap();
        assert_eq!(sampled, dataset);
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let dataset = Dataset::from_columns([("a", (0..5000).map(f64::from).collect())]).unwrap();
        let first = dataset.sample(0.05, 42).unwrap();
        let second = dataset.sample(0.05, 42).unwrap();

        assert_eq!(first.len(), 250);
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_sample_fraction() {
        let dataset = Dataset::new();
        assert!(dataset.sample(0.0, 42).is_err());
        assert!(dataset.sample(1.5, 42).is_err());
    }
}
