//! Storage Layer
//!
//! Persists trained models, their metadata and the feature ranges under a
//! single directory, one subdirectory per output variable.

mod store;

pub use store::{
    ModelStore, StoredModels, CORRELATIONS_FILE, METADATA_FILE, MODEL_FILE, RANGES_FILE,
};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No trained models found in {0}")]
    NeverTrained(String),
    #[error("Corrupt artifact {path}: {reason}")]
    Corruption { path: String, reason: String },
    #[error("Feature mismatch for {output}: stored [{stored}], expected [{expected}]")]
    FeatureMismatch {
        output: String,
        stored: String,
        expected: String,
    },
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StorageError {
    fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn corruption(path: &std::path::Path, reason: impl Into<String>) -> Self {
        StorageError::Corruption {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}
