//! Feature Vector Assembly
//!
//! The canonical feature set is the seven raw driving parameters followed by
//! three engineered interaction terms. Training and inference both go through
//! this module, so the ordering here is the contract every stored model is
//! validated against.

use crate::dataset::Dataset;
use crate::FeatureError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Number of raw driving parameters
pub const RAW_DIMENSION: usize = 7;

/// Number of features in the vector (raw + engineered)
pub const FEATURE_DIMENSION: usize = 10;

/// Engineered feature names, in canonical order
pub const ENGINEERED_FEATURES: [&str; 3] = ["speed_x_brake", "throttle_x_surface", "temp_diff"];

const FEATURE_NAMES: [&str; FEATURE_DIMENSION] = [
    "Throttle",
    "Brake",
    "Speed",
    "Surface_Roughness",
    "front_surface_temp",
    "rear_surface_temp",
    "force_on_tire",
    "speed_x_brake",
    "throttle_x_surface",
    "temp_diff",
];

/// Raw parameter map as supplied by a caller or read from a dataset row
pub type RawRow = BTreeMap<String, f64>;

/// Canonical ordered feature list shared by training and inference
pub fn feature_names() -> &'static [&'static str] {
    &FEATURE_NAMES
}

/// Canonical ordered raw parameter list
pub fn raw_parameter_names() -> &'static [&'static str] {
    &FEATURE_NAMES[..RAW_DIMENSION]
}

/// Driving condition supplied directly by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RawParameter {
    Throttle,
    Brake,
    Speed,
    #[serde(rename = "Surface_Roughness")]
    SurfaceRoughness,
    #[serde(rename = "front_surface_temp")]
    FrontSurfaceTemp,
    #[serde(rename = "rear_surface_temp")]
    RearSurfaceTemp,
    #[serde(rename = "force_on_tire")]
    ForceOnTire,
}

impl RawParameter {
    /// All raw parameters in canonical order
    pub const ALL: [RawParameter; RAW_DIMENSION] = [
        RawParameter::Throttle,
        RawParameter::Brake,
        RawParameter::Speed,
        RawParameter::SurfaceRoughness,
        RawParameter::FrontSurfaceTemp,
        RawParameter::RearSurfaceTemp,
        RawParameter::ForceOnTire,
    ];

    /// Column / request key name
    pub fn as_str(&self) -> &'static str {
        FEATURE_NAMES[self.index()]
    }

    /// Position in the canonical feature vector
    pub fn index(&self) -> usize {
        match self {
            RawParameter::Throttle => 0,
            RawParameter::Brake => 1,
            RawParameter::Speed => 2,
            RawParameter::SurfaceRoughness => 3,
            RawParameter::FrontSurfaceTemp => 4,
            RawParameter::RearSurfaceTemp => 5,
            RawParameter::ForceOnTire => 6,
        }
    }

    /// Look up a raw parameter by its exact key
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for RawParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicted quantity with its own independently trained model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputVariable {
    TireWear,
    TireDegradation,
    CumulativeTireWear,
}

impl OutputVariable {
    /// All declared output variables
    pub const ALL: [OutputVariable; 3] = [
        OutputVariable::TireWear,
        OutputVariable::TireDegradation,
        OutputVariable::CumulativeTireWear,
    ];

    /// Normalized name
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputVariable::TireWear => "tire_wear",
            OutputVariable::TireDegradation => "tire_degradation",
            OutputVariable::CumulativeTireWear => "cumulative_tire_wear",
        }
    }

    /// Look up an output variable by its normalized name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|o| o.as_str() == name)
    }

    /// Map a dataset header onto an output variable.
    ///
    /// Headers in the simulated dataset mix case, spaces and misspellings
    /// (`Tire degreadation`, `cumilative_Tire_Wear`).
    pub fn from_column(header: &str) -> Option<Self> {
        let normalized = header.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "tire_wear" => Some(OutputVariable::TireWear),
            "tire_degradation" | "tire_degreadation" => Some(OutputVariable::TireDegradation),
            "cumulative_tire_wear" | "cumilative_tire_wear" => {
                Some(OutputVariable::CumulativeTireWear)
            }
            _ => None,
        }
    }
}

impl fmt::Display for OutputVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature vector for model inference, ordered as [`feature_names`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Feature values
    pub values: Vec<f64>,
}

impl FeatureVector {
    /// Build from raw parameters in canonical order
    pub fn from_raw(raw: [f64; RAW_DIMENSION]) -> Self {
        let mut values = Vec::with_capacity(FEATURE_DIMENSION);
        values.extend_from_slice(&raw);

        let throttle = raw[RawParameter::Throttle.index()];
        let brake = raw[RawParameter::Brake.index()];
        let speed = raw[RawParameter::Speed.index()];
        let roughness = raw[RawParameter::SurfaceRoughness.index()];
        let front = raw[RawParameter::FrontSurfaceTemp.index()];
        let rear = raw[RawParameter::RearSurfaceTemp.index()];

        // Braking at speed, aggressive throttle on rough surfaces, thermal imbalance
        values.push(speed * brake);
        values.push(throttle * roughness);
        values.push(front - rear);

        Self { values }
    }

    /// Feature names matching `values`
    pub fn names(&self) -> &'static [&'static str] {
        feature_names()
    }

    /// Value of a named feature
    pub fn get(&self, name: &str) -> Option<f64> {
        feature_names()
            .iter()
            .position(|n| *n == name)
            .and_then(|i| self.values.get(i).copied())
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        feature_names().iter().copied().zip(self.values.iter().copied())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Derive the full feature vector from a raw row.
///
/// Every declared raw parameter must be present and finite. Extra keys are
/// ignored here; request validation happens in the prediction service.
pub fn derive_features(raw: &RawRow) -> Result<FeatureVector, FeatureError> {
    let mut values = [0.0; RAW_DIMENSION];
    for param in RawParameter::ALL {
        let value = raw
            .get(param.as_str())
            .copied()
            .ok_or_else(|| FeatureError::MissingParameter(param.as_str().to_string()))?;
        if !value.is_finite() {
            return Err(FeatureError::NonFinite {
                name: param.as_str().to_string(),
                value,
            });
        }
        values[param.index()] = value;
    }
    Ok(FeatureVector::from_raw(values))
}

/// Append the engineered columns to a dataset.
///
/// Fails when any raw parameter column is missing from the source.
pub fn derive_dataset(dataset: &Dataset) -> Result<Dataset, FeatureError> {
    let missing: Vec<String> = raw_parameter_names()
        .iter()
        .filter(|name| !dataset.has_column(name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(FeatureError::MissingColumns(missing));
    }

    let column = |p: RawParameter| dataset.column(p.as_str()).unwrap_or(&[]);
    let throttle = column(RawParameter::Throttle);
    let brake = column(RawParameter::Brake);
    let speed = column(RawParameter::Speed);
    let roughness = column(RawParameter::SurfaceRoughness);
    let front = column(RawParameter::FrontSurfaceTemp);
    let rear = column(RawParameter::RearSurfaceTemp);

    let speed_x_brake: Vec<f64> = speed.iter().zip(brake).map(|(s, b)| s * b).collect();
    let throttle_x_surface: Vec<f64> =
        throttle.iter().zip(roughness).map(|(t, r)| t * r).collect();
    let temp_diff: Vec<f64> = front.iter().zip(rear).map(|(f, r)| f - r).collect();

    let mut derived = dataset.clone();
    derived.push_column(ENGINEERED_FEATURES[0], speed_x_brake)?;
    derived.push_column(ENGINEERED_FEATURES[1], throttle_x_surface)?;
    derived.push_column(ENGINEERED_FEATURES[2], temp_diff)?;

    debug!("Derived {} engineered columns over {} rows", ENGINEERED_FEATURES.len(), derived.len());
    Ok(derived)
}
