//! Tire Wear Predictor - Main Entry Point

use api::{init_logging, run_server, AppConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("=== Tire Wear Predictor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Dataset: {}, models: {}, kind: {}, sample fraction: {}",
        config.dataset.source.display(),
        config.store.models_dir.display(),
        config.training.model_kind,
        config.dataset.sample_fraction
    );

    run_server(config).await
}
