use flux_batch::{
    app_state::{AppError, AppState},
    config::AppConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "Connection probe failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let endpoint = format!("{}{}", config.base_url, config.submit_path);
    let state = AppState::new(config)?;

    tracing::info!(%endpoint, "Testing connection to generation service");
    state.client.test_connection().await?;
    tracing::info!(
        styles = state.catalog.styles.len(),
        aspects = state.catalog.aspects.len(),
        qualities = state.catalog.qualities.len(),
        "Service reachable and API key accepted"
    );
    Ok(())
}
