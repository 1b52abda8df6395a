use std::sync::Arc;

use crate::config::{AppConfig, ConfigError};
use crate::models::catalog::{Catalog, CatalogError};
use crate::services::generator::FluxClient;
use crate::services::image::ImageError;
use crate::services::orchestrator::MatrixError;
use crate::services::submission::SubmissionError;

/// Shared wiring for the binaries: configuration, catalog and API client.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<Catalog>,
    pub client: Arc<FluxClient>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let catalog = match &config.catalog_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading catalog from file");
                Catalog::from_path(path)?
            }
            None => Catalog::builtin()?,
        };

        let client = FluxClient::new(
            &config.base_url,
            &config.submit_path,
            config.api_key(),
            config.client_settings(),
        )
        .map_err(AppError::HttpClient)?;

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            client: Arc::new(client),
        })
    }
}

/// Everything that can stop a binary before or after the batch itself.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("Connection test failed: {0}")]
    Connection(#[from] SubmissionError),

    #[error("Failed to write report: {0}")]
    Report(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to start metrics exporter: {0}")]
    Metrics(String),
}
