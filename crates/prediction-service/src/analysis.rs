//! Parameter impact analysis, correlation ranking and preset driving
//! scenarios

use crate::service::{ParameterRequest, PredictionResult};
use feature_engine::{OutputVariable, RawParameter, RAW_DIMENSION};
use serde::Serialize;
use std::collections::BTreeMap;

/// Effect of a parameter change on one output variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactEntry {
    pub output_variable: OutputVariable,
    pub baseline: f64,
    pub modified: f64,
    pub change: f64,
    /// Relative change in percent; 0 when the baseline is 0
    pub percent_change: f64,
}

/// Impact of shifting one parameter from its median
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactReport {
    pub parameter: RawParameter,
    pub change: f64,
    /// Sorted by absolute percent change, largest first
    pub impacts: Vec<ImpactEntry>,
}

pub(crate) fn impact_report(
    parameter: RawParameter,
    change: f64,
    baseline: &PredictionResult,
    modified: &PredictionResult,
) -> ImpactReport {
    let mut impacts: Vec<ImpactEntry> = baseline
        .iter()
        .filter_map(|(output, &before)| {
            let after = *modified.get(output)?;
            let delta = after - before;
            let percent_change = if before != 0.0 {
                delta / before * 100.0
            } else {
                0.0
            };
            Some(ImpactEntry {
                output_variable: *output,
                baseline: before,
                modified: after,
                change: delta,
                percent_change,
            })
        })
        .collect();
    impacts.sort_by(|a, b| b.percent_change.abs().total_cmp(&a.percent_change.abs()));

    ImpactReport {
        parameter,
        change,
        impacts,
    }
}

/// Qualitative size of a correlation coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CorrelationStrength {
    /// |r| > 0.7
    Strong,
    /// 0.3 < |r| <= 0.7
    Moderate,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CorrelationDirection {
    Positive,
    Negative,
}

/// Correlation of the requested column with one other column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationEntry {
    pub variable: String,
    pub correlation: f64,
    pub strength: CorrelationStrength,
    pub direction: CorrelationDirection,
}

impl CorrelationEntry {
    pub fn new(variable: impl Into<String>, correlation: f64) -> Self {
        let magnitude = correlation.abs();
        let strength = if magnitude > 0.7 {
            CorrelationStrength::Strong
        } else if magnitude > 0.3 {
            CorrelationStrength::Moderate
        } else {
            CorrelationStrength::Weak
        };
        let direction = if correlation > 0.0 {
            CorrelationDirection::Positive
        } else {
            CorrelationDirection::Negative
        };
        Self {
            variable: variable.into(),
            correlation,
            strength,
            direction,
        }
    }
}

/// Every training-data correlation of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationReport {
    pub parameter: String,
    /// Sorted by absolute correlation, strongest first; excludes the column itself
    pub correlations: Vec<CorrelationEntry>,
}

pub(crate) fn correlation_report(
    parameter: &str,
    row: Option<&BTreeMap<String, f64>>,
) -> CorrelationReport {
    let mut correlations: Vec<CorrelationEntry> = row
        .into_iter()
        .flatten()
        .filter(|(name, _)| name.as_str() != parameter)
        .map(|(name, &r)| CorrelationEntry::new(name.as_str(), r))
        .collect();
    correlations.sort_by(|a, b| b.correlation.abs().total_cmp(&a.correlation.abs()));

    CorrelationReport {
        parameter: parameter.to_string(),
        correlations,
    }
}

/// Named preset of raw driving parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrivingScenario {
    pub name: &'static str,
    /// Values in canonical raw-parameter order
    pub values: [f64; RAW_DIMENSION],
}

const PRESETS: [DrivingScenario; 4] = [
    DrivingScenario {
        name: "normal",
        values: [0.7, 0.1, 120.0, 1.2, 85.0, 100.0, 25000.0],
    },
    DrivingScenario {
        name: "aggressive",
        values: [1.0, 0.3, 180.0, 1.4, 110.0, 120.0, 40000.0],
    },
    DrivingScenario {
        name: "careful",
        values: [0.5, 0.05, 80.0, 1.1, 83.0, 99.0, 15000.0],
    },
    DrivingScenario {
        name: "racing",
        values: [0.9, 0.4, 200.0, 1.5, 140.0, 145.0, 50000.0],
    },
];

impl DrivingScenario {
    pub fn presets() -> &'static [DrivingScenario] {
        &PRESETS
    }

    pub fn find(name: &str) -> Option<&'static DrivingScenario> {
        PRESETS.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Full raw-parameter request for this scenario
    pub fn request(&self) -> ParameterRequest {
        RawParameter::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), self.values[p.index()]))
            .collect()
    }
}

/// Predictions for one preset scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioPrediction {
    pub name: String,
    pub parameters: ParameterRequest,
    pub predictions: PredictionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impact_sorted_by_magnitude() {
        let baseline: PredictionResult = [
            (OutputVariable::TireWear, 10.0),
            (OutputVariable::TireDegradation, 50.0),
            (OutputVariable::CumulativeTireWear, 0.0),
        ]
        .into_iter()
        .collect();
        let modified: PredictionResult = [
            (OutputVariable::TireWear, 11.0),
            (OutputVariable::TireDegradation, 40.0),
            (OutputVariable::CumulativeTireWear, 3.0),
        ]
        .into_iter()
        .collect();

        let report = impact_report(RawParameter::Speed, 20.0, &baseline, &modified);
        let order: Vec<_> = report.impacts.iter().map(|e| e.output_variable).collect();
        assert_eq!(
            order,
            vec![
                OutputVariable::TireDegradation,
                OutputVariable::TireWear,
                OutputVariable::CumulativeTireWear
            ]
        );
        assert!((report.impacts[0].percent_change + 20.0).abs() < 1e-12);
        assert_eq!(report.impacts[2].percent_change, 0.0);
        assert_eq!(report.impacts[2].change, 3.0);
    }

    #[test]
    fn test_correlation_labels() {
        let strong = CorrelationEntry::new("Speed", -0.85);
        assert_eq!(strong.strength, CorrelationStrength::Strong);
        assert_eq!(strong.direction, CorrelationDirection::Negative);

        let moderate = CorrelationEntry::new("Brake", 0.7);
        assert_eq!(moderate.strength, CorrelationStrength::Moderate);
        assert_eq!(moderate.direction, CorrelationDirection::Positive);

        let weak = CorrelationEntry::new("Throttle", 0.3);
        assert_eq!(weak.strength, CorrelationStrength::Weak);
        assert_eq!(CorrelationEntry::new("x", 0.0).direction, CorrelationDirection::Negative);
    }

    #[test]
    fn test_correlation_report_sorted_without_self() {
        let row: BTreeMap<String, f64> = [
            ("Speed", 1.0),
            ("Brake", 0.2),
            ("tire_wear", -0.9),
            ("Throttle", 0.5),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let report = correlation_report("Speed", Some(&row));
        let names: Vec<&str> = report.correlations.iter().map(|e| e.variable.as_str()).collect();
        assert_eq!(names, vec!["tire_wear", "Throttle", "Brake"]);
        assert!(correlation_report("Speed", None).correlations.is_empty());
    }

    #[test]
    fn test_scenario_request_covers_every_parameter() {
        let racing = DrivingScenario::find("Racing").unwrap();
        let request = racing.request();

        assert_eq!(request.len(), RAW_DIMENSION);
        assert_eq!(request["Speed"], 200.0);
        assert_eq!(request["Throttle"], 0.9);
        assert_eq!(request["force_on_tire"], 50000.0);
        assert!(DrivingScenario::find("drifting").is_none());
    }
}
