//! End-to-end generation: submit, poll, then download.

use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::ClientSettings;
use crate::models::job::JobSpec;
use crate::services::poller::{PollError, StatusPoller};
use crate::services::retriever::ResultRetriever;
use crate::services::retry::{Clock, TokioClock};
use crate::services::submission::{SubmissionClient, SubmissionError};

/// Anything that can turn a job spec into image bytes.
pub trait ImageGenerator {
    fn generate(&self, spec: JobSpec) -> impl Future<Output = Result<Vec<u8>, GenerationError>>;
}

/// Client for the FLUX image-editing API.
pub struct FluxClient<C = TokioClock> {
    submission: SubmissionClient<C>,
    poller: StatusPoller<C>,
    retriever: ResultRetriever,
}

impl FluxClient<TokioClock> {
    pub fn new(
        base_url: &str,
        submit_path: &str,
        api_key: &str,
        settings: ClientSettings,
    ) -> Result<Self, reqwest::Error> {
        Self::with_clock(base_url, submit_path, api_key, settings, TokioClock)
    }
}

impl<C: Clock> FluxClient<C> {
    pub fn with_clock(
        base_url: &str,
        submit_path: &str,
        api_key: &str,
        settings: ClientSettings,
        clock: C,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        let endpoint = join_url(base_url, submit_path);

        Ok(Self {
            submission: SubmissionClient::with_clock(
                http.clone(),
                endpoint,
                api_key.to_string(),
                &settings,
                clock.clone(),
            ),
            retriever: ResultRetriever::new(http.clone(), settings.download_timeout),
            poller: StatusPoller::with_clock(http, api_key.to_string(), settings, clock),
        })
    }

    /// Run one job through submission, polling and download.
    pub async fn generate(&self, spec: JobSpec) -> Result<Vec<u8>, GenerationError> {
        let started = Instant::now();
        let seed = spec.seed;

        let result = self.run(spec).await;

        let outcome = match &result {
            Ok(bytes) => {
                info!(seed, size_bytes = bytes.len(), "Image generated");
                "success"
            }
            Err(err) => {
                warn!(seed, error = %err, transient = err.is_transient(), "Image generation failed");
                err.outcome()
            }
        };
        metrics::counter!("flux_generations_total", "outcome" => outcome).increment(1);
        metrics::histogram!("flux_generation_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    /// Check that the service is reachable and accepts the API key.
    pub async fn test_connection(&self) -> Result<(), SubmissionError> {
        self.submission.test_connection().await
    }

    async fn run(&self, spec: JobSpec) -> Result<Vec<u8>, GenerationError> {
        let handle = self.submission.submit(spec).await?;
        let job = self.poller.poll(&handle).await?;

        let bytes = self.retriever.retrieve(&job).await;
        bytes.ok_or(GenerationError::NoArtifact {
            request_id: job.request_id,
        })
    }
}

impl<C: Clock> ImageGenerator for FluxClient<C> {
    fn generate(&self, spec: JobSpec) -> impl Future<Output = Result<Vec<u8>, GenerationError>> {
        FluxClient::generate(self, spec)
    }
}

impl<T: ImageGenerator> ImageGenerator for Arc<T> {
    fn generate(&self, spec: JobSpec) -> impl Future<Output = Result<Vec<u8>, GenerationError>> {
        (**self).generate(spec)
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("Job completed but the image could not be downloaded")]
    NoArtifact { request_id: Option<String> },
}

impl GenerationError {
    /// Whether trying the same spec again later could succeed.
    ///
    /// Rejections, invalid specs and remote failures are configuration or
    /// content problems; exhausted retries, timeouts and download failures
    /// are service conditions.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Submission(err) => err.is_transient(),
            Self::Poll(err) => err.is_transient(),
            Self::NoArtifact { .. } => true,
        }
    }

    /// Metric label for this failure.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Submission(SubmissionError::InvalidSpec(_)) => "invalid_spec",
            Self::Submission(SubmissionError::Rejected { .. }) => "rejected",
            Self::Submission(_) => "submission_failed",
            Self::Poll(PollError::RemoteFailure { .. }) => "remote_failure",
            Self::Poll(PollError::ModerationTimedOut { .. }) => "moderation_timeout",
            Self::Poll(_) => "poll_timeout",
            Self::NoArtifact { .. } => "no_artifact",
        }
    }
}
