//! Tire Wear Prediction API Server
//!
//! REST API over the prediction service: lazy model initialization,
//! predictions, impact and correlation analysis, driving scenarios and
//! Prometheus metrics.

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use feature_engine::CsvDatasetSource;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prediction_service::PredictionService;
use std::sync::Arc;
use storage::ModelStore;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod error;
mod routes;
mod settings;

pub use error::ApiError;
pub use settings::{
    ApiSettings, AppConfig, DatasetSettings, LoggingSettings, PredictionSettings,
    StoreSettings, TrainingSettings,
};

/// Application state shared across handlers
pub struct AppState {
    pub service: PredictionService,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Prometheus exposition handle, absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: PredictionService, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            service,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            metrics,
        }
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/initialize", get(routes::model::initialize))
        .route("/api/health", get(routes::model::health))
        .route("/api/metadata", get(routes::model::metadata))
        .route("/api/feature-importance", get(routes::model::feature_importance))
        .route("/api/predict", post(routes::predictions::predict))
        .route("/api/impact", post(routes::predictions::impact))
        .route("/api/scenarios", get(routes::predictions::scenarios))
        .route(
            "/api/correlations/:parameter",
            get(routes::predictions::correlations),
        )
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// Initialize logging
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    let level: Level = settings
        .level
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid log level {:?}: {}", settings.level, e))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);
    if settings.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Build the service described by `config`
pub fn build_service(config: &AppConfig) -> PredictionService {
    PredictionService::new(
        config.service_config(),
        Arc::new(CsvDatasetSource::new(&config.dataset.source)),
        ModelStore::new(&config.store.models_dir),
    )
}

/// Run the server
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let metrics = PrometheusBuilder::new().install_recorder()?;
    let state = Arc::new(AppState::new(build_service(&config), Some(metrics)));
    let app = create_router(state, &config.api.cors_origins);

    let addr = config.api.addr();
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
