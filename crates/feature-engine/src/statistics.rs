//! Feature Range Statistics

use crate::dataset::Dataset;
use crate::features::{feature_names, OutputVariable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Ranges keyed by feature or output name
pub type FeatureRanges = BTreeMap<String, FeatureRange>;

/// Pairwise Pearson coefficients keyed by column name, then partner name
pub type Correlations = BTreeMap<String, BTreeMap<String, f64>>;

/// Observed value range of a single column in the training dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl FeatureRange {
    /// Compute range statistics, skipping NaN values.
    ///
    /// Returns `None` if no finite value is present.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };

        Some(Self {
            min: sorted[0],
            max: sorted[n - 1],
            mean,
            median,
        })
    }

    /// Bound a value to the observed `[min, max]`
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Whether a value lies inside the observed range
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Summarize every feature column (raw and engineered) and every output
/// column present in a derived dataset.
pub fn summarize(dataset: &Dataset) -> FeatureRanges {
    let outputs = OutputVariable::ALL.iter().map(|o| o.as_str());
    let mut ranges = FeatureRanges::new();

    for name in feature_names().iter().copied().chain(outputs) {
        let Some(values) = dataset.column(name) else {
            continue;
        };
        if let Some(range) = FeatureRange::from_values(values) {
            debug!(
                "Range {}: min={:.3}, max={:.3}, median={:.3}",
                name, range.min, range.max, range.median
            );
            ranges.insert(name.to_string(), range);
        }
    }

    ranges
}

/// Pearson correlation over the rows where both values are finite.
///
/// Returns `None` with fewer than two such rows or when either side is
/// constant.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Correlation matrix over every feature column and every output column
/// present in a derived dataset. Undefined pairs are left out.
pub fn correlation_matrix(dataset: &Dataset) -> Correlations {
    let outputs = OutputVariable::ALL.iter().map(|o| o.as_str());
    let columns: Vec<(&str, &[f64])> = feature_names()
        .iter()
        .copied()
        .chain(outputs)
        .filter_map(|name| dataset.column(name).map(|values| (name, values)))
        .collect();

    let mut matrix = Correlations::new();
    for (i, (name_a, a)) in columns.iter().enumerate() {
        for (name_b, b) in &columns[i..] {
            let Some(r) = pearson(a, b) else {
                continue;
            };
            matrix
                .entry(name_a.to_string())
                .or_default()
                .insert(name_b.to_string(), r);
            matrix
                .entry(name_b.to_string())
                .or_default()
                .insert(name_a.to_string(), r);
        }
    }

    debug!("Correlation matrix over {} columns", matrix.len());
    matrix
}
