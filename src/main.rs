use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use flux_batch::{
    app_state::{AppError, AppState},
    config::{AppConfig, BatchConfig},
    models::batch::MatrixReport,
    services::{
        image::{self, ImageStore},
        orchestrator::{
            CatalogSpecBuilder, MatrixRequest, Pacing, RotationSpecBuilder, SpecBuilder,
            VariationMatrix,
        },
    },
};

const REPORT_FILE: &str = "all_variations_results.json";
const ROTATION_DIR: &str = "rotation";
const ROTATION_REPORT_FILE: &str = "rotation_results.json";

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
        tracing::error!(error = %err, "Batch generation failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let batch = BatchConfig::from_env()?;

    if let Some(addr) = &config.metrics_addr {
        install_metrics(addr)?;
    }

    let state = AppState::new(config)?;
    let catalog = state.catalog.as_ref();

    let input_path = image::find_input_image(&state.config.input_dir, &state.config.input_image)?;
    let input_image = image::encode_data_uri(&input_path)?;
    tracing::info!(path = %input_path.display(), "Using input image");

    let pacing = Pacing {
        between_attempts: Duration::from_millis(batch.attempt_delay_ms),
        between_cells: Duration::from_millis(batch.cell_delay_ms),
        between_groups: Duration::from_millis(batch.group_delay_ms),
    };

    let (report, report_path) = match batch.rotation_steps {
        Some(steps) => {
            let request = MatrixRequest::rotation_sequence(steps, batch.start_seed)?;
            let builder = RotationSpecBuilder::new(catalog.clone(), input_image)
                .with_base_prompt(batch.prompt)
                .with_output_format(batch.output_format);
            let output_dir = state.config.output_dir.join(ROTATION_DIR);
            tracing::info!(steps, "Generating character rotation");
            run_matrix(&state, builder, &request, pacing, &output_dir, ROTATION_REPORT_FILE).await?
        }
        None => {
            let request = MatrixRequest {
                styles: selection(batch.styles, || catalog.style_keys()),
                aspects: selection(batch.aspects, || catalog.aspect_keys()),
                qualities: selection(batch.qualities, || catalog.quality_keys()),
                count_per_variation: batch.count_per_variation,
                start_seed: batch.start_seed,
            };
            let builder = CatalogSpecBuilder::new(catalog.clone(), input_image)
                .with_prompt(batch.prompt)
                .with_output_format(batch.output_format);
            let output_dir = state.config.output_dir.clone();
            run_matrix(&state, builder, &request, pacing, &output_dir, REPORT_FILE).await?
        }
    };

    let stats = &report.statistics;
    tracing::info!(
        run_id = %report.run_id,
        total_variations = stats.total_variations,
        successful_variations = stats.successful_variations,
        total_images = stats.total_images,
        successful_images = stats.successful_images,
        report = %report_path.display(),
        "Batch finished: {stats}"
    );

    Ok(())
}

/// Run `request`, save images under `output_dir` and write the JSON report there.
async fn run_matrix<B: SpecBuilder>(
    state: &AppState,
    builder: B,
    request: &MatrixRequest,
    pacing: Pacing,
    output_dir: &Path,
    report_file: &str,
) -> Result<(MatrixReport, std::path::PathBuf), AppError> {
    let matrix = VariationMatrix::new(state.client.clone(), builder, state.catalog.as_ref().clone())
        .with_pacing(pacing)
        .with_store(ImageStore::new(output_dir));

    let report = matrix.run(request).await?;

    tokio::fs::create_dir_all(output_dir).await?;
    let report_path = output_dir.join(report_file);
    tokio::fs::write(&report_path, serde_json::to_vec_pretty(&report)?).await?;

    Ok((report, report_path))
}

/// Requested keys, trimmed, or every catalog key when nothing was requested.
fn selection(requested: Option<Vec<String>>, all: impl FnOnce() -> Vec<String>) -> Vec<String> {
    match requested {
        Some(values) => values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect(),
        None => all(),
    }
}

fn install_metrics(addr: &str) -> Result<(), AppError> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| AppError::Metrics(format!("invalid address {addr}: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::Metrics(e.to_string()))?;

    metrics::describe_counter!("flux_submissions_total", "Generation jobs submitted");
    metrics::describe_counter!(
        "flux_submission_retries_total",
        "Submission attempts retried after a server or transport failure"
    );
    metrics::describe_counter!(
        "flux_poll_transport_errors_total",
        "Status queries that failed at the transport level"
    );
    metrics::describe_counter!(
        "flux_generations_total",
        "Completed generation attempts by outcome"
    );
    metrics::describe_histogram!(
        "flux_generation_seconds",
        "Time from submission to downloaded image"
    );

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}
