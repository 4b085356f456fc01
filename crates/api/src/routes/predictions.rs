//! Prediction Routes

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use feature_engine::RawParameter;
use prediction_service::{
    CorrelationReport, ImpactReport, ParameterRequest, PredictionResult, ScenarioPrediction,
    ServiceError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

/// Response for the predict endpoint
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub status: &'static str,
    pub predictions: PredictionResult,
}

/// Predict every output from a partial set of raw parameters
pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BTreeMap<String, Value>>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let request = decode_request(payload).map_err(|e| {
        record_rejection(&e);
        e
    })?;
    let predictions = state.service.predict(&request).await?;
    Ok(Json(PredictionResponse {
        status: "success",
        predictions,
    }))
}

fn decode_request(
    payload: Result<Json<BTreeMap<String, Value>>, JsonRejection>,
) -> Result<ParameterRequest, ApiError> {
    let Json(body) = payload?;
    Ok(parameter_request(body)?)
}

/// Bodies rejected here never reach the service, so count them alongside
/// the service's own prediction errors
fn record_rejection(error: &ApiError) {
    metrics::counter!("prediction_errors_total", "kind" => error.kind()).increment(1);
}

/// Convert a JSON object into a parameter request.
///
/// Unknown keys are reported before malformed values.
fn parameter_request(body: BTreeMap<String, Value>) -> Result<ParameterRequest, ServiceError> {
    if let Some(unknown) = body.keys().find(|k| RawParameter::from_name(k).is_none()) {
        return Err(ServiceError::UnknownParameter(unknown.clone()));
    }
    body.into_iter()
        .map(|(name, value)| match value.as_f64() {
            Some(v) => Ok((name, v)),
            None => Err(ServiceError::InvalidValue {
                name,
                value: value.to_string(),
            }),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct ImpactRequest {
    pub parameter: String,
    pub change: f64,
}

#[derive(Debug, Serialize)]
pub struct ImpactResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub report: ImpactReport,
}

/// Shift one parameter from its median and report the effect per output
pub async fn impact(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ImpactRequest>, JsonRejection>,
) -> Result<Json<ImpactResponse>, ApiError> {
    let Json(request) = payload?;
    let report = state
        .service
        .analyze_impact(&request.parameter, request.change)
        .await?;
    Ok(Json(ImpactResponse {
        status: "success",
        report,
    }))
}

#[derive(Debug, Serialize)]
pub struct CorrelationResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub report: CorrelationReport,
}

/// Training-data correlations of one column, strongest first
pub async fn correlations(
    State(state): State<Arc<AppState>>,
    Path(parameter): Path<String>,
) -> Result<Json<CorrelationResponse>, ApiError> {
    let report = state.service.correlations(&parameter).await?;
    Ok(Json(CorrelationResponse {
        status: "success",
        report,
    }))
}

#[derive(Debug, Serialize)]
pub struct ScenariosResponse {
    pub status: &'static str,
    pub scenarios: Vec<ScenarioPrediction>,
}

/// Predictions for the preset driving scenarios
pub async fn scenarios(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScenariosResponse>, ApiError> {
    let scenarios = state.service.scenarios().await?;
    Ok(Json(ScenariosResponse {
        status: "success",
        scenarios,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parameter_request_conversion() {
        let request = parameter_request(body(json!({"Speed": 120, "Brake": 0.25}))).unwrap();
        assert_eq!(request["Speed"], 120.0);
        assert_eq!(request["Brake"], 0.25);
    }

    #[test]
    fn test_unknown_key_reported_first() {
        let err = parameter_request(body(json!({"Speed": "fast", "Wind": 3}))).unwrap_err();
        assert_eq!(err, ServiceError::UnknownParameter("Wind".to_string()));
    }

    #[test]
    fn test_non_numeric_value() {
        let err = parameter_request(body(json!({"Throttle": null}))).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidValue { name, .. } if name == "Throttle"));
    }

    #[test]
    fn test_rejected_bodies_are_counted_by_kind() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            for value in [json!({"Wind": 3}), json!({"Gust": 1}), json!({"Speed": "fast"})] {
                let err = decode_request(Ok(Json(body(value)))).unwrap_err();
                record_rejection(&err);
            }
        });

        let rendered = handle.render();
        assert!(
            rendered.contains(r#"prediction_errors_total{kind="unknown_parameter"} 2"#),
            "{}",
            rendered
        );
        assert!(rendered.contains(r#"prediction_errors_total{kind="invalid_value"} 1"#));
    }
}
