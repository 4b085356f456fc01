//! Model lifecycle routes

use axum::{extract::State, Json};
use feature_engine::OutputVariable;
use model_trainer::ModelMetadata;
use prediction_service::{Initialization, StateKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub initialization: Initialization,
}

/// Load or train the models
pub async fn initialize(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InitializeResponse>, ApiError> {
    let initialization = state.service.initialize().await?;
    Ok(Json(InitializeResponse {
        status: "success",
        initialization,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub trained: bool,
    pub state: StateKind,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health check handler
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health().await;
    Json(HealthResponse {
        status: if health.state == StateKind::Failed {
            "unhealthy"
        } else {
            "healthy"
        },
        trained: health.trained,
        state: health.state,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        error: health.error,
    })
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub status: &'static str,
    pub metadata: BTreeMap<OutputVariable, ModelMetadata>,
}

pub async fn metadata(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let metadata = state.service.metadata().await?;
    Ok(Json(MetadataResponse {
        status: "success",
        metadata,
    }))
}

#[derive(Debug, Serialize)]
pub struct ImportanceResponse {
    pub status: &'static str,
    pub importances: BTreeMap<OutputVariable, Vec<(String, f64)>>,
}

/// Per-output feature importances, most important first
pub async fn feature_importance(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ImportanceResponse>, ApiError> {
    let importances = state.service.feature_importances().await?;
    Ok(Json(ImportanceResponse {
        status: "success",
        importances,
    }))
}
