use garde::Validate;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::models::job::{JobHandle, JobSpec, OutputFormat, QualityOptions};
use crate::services::retry::{Clock, FaultKind, RetryPolicy, RetryState, TokioClock};

/// 1x1 JPEG used by the connection probe.
const PROBE_IMAGE: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRgABAQAAAQABAAD/2wBDAAYEBQYFBAYGBQYHBwYIChAKCgkJChQODwwQFxQYGBcUFhYaHSUfGhsjHBYWICwgIyYnKSopGR8tMC0oMCUoKSj/2wBDAQcHBwoIChMKChMoGhYaKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCgoKCj/wAARCAABAAEDASIAAhEBAxEB/8QAFQABAQAAAAAAAAAAAAAAAAAAAAv/xAAUEAEAAAAAAAAAAAAAAAAAAAAA/8QAFQEBAQAAAAAAAAAAAAAAAAAAAAX/xAAUEQEAAAAAAAAAAAAAAAAAAAAA/9oADAMBAAIRAxEAPwCdABmX/9k=";

/// Posts generation jobs and retries transient server/transport failures.
pub struct SubmissionClient<C = TokioClock> {
    http: Client,
    endpoint: String,
    api_key: String,
    policy: RetryPolicy,
    clock: C,
}

#[derive(Deserialize)]
struct AcceptedResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    polling_url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

impl SubmissionClient<TokioClock> {
    pub fn new(http: Client, endpoint: String, api_key: String, settings: &ClientSettings) -> Self {
        Self::with_clock(http, endpoint, api_key, settings, TokioClock)
    }
}

impl<C: Clock> SubmissionClient<C> {
    pub fn with_clock(
        http: Client,
        endpoint: String,
        api_key: String,
        settings: &ClientSettings,
        clock: C,
    ) -> Self {
        Self {
            http,
            endpoint,
            api_key,
            policy: RetryPolicy::fixed(settings.max_retries.max(1), settings.retry_delay),
            clock,
        }
    }

    /// Submit a job, returning the handle to poll.
    ///
    /// Statuses below 500 are final. 5xx and transport failures are retried
    /// with the fixed retry delay (doubled for connection failures).
    pub async fn submit(&self, spec: JobSpec) -> Result<JobHandle, SubmissionError> {
        spec.validate()?;
        metrics::counter!("flux_submissions_total").increment(1);

        let mut state = RetryState::new();
        let mut last_error = String::new();

        while state.has_attempts_left(&self.policy) {
            state.advance();
            debug!(seed = spec.seed, attempt = state.attempt, "Submitting generation job");

            let fault = match self.send(&spec).await {
                Ok(response) if response.status().as_u16() < 500 => {
                    return self.accept(response, spec).await;
                }
                Ok(response) => {
                    let status = response.status();
                    last_error = format!("server error {status}");
                    FaultKind::Status(status.as_u16())
                }
                Err(err) => {
                    last_error = err.to_string();
                    FaultKind::from_reqwest(&err)
                }
            };
            state.record_fault();

            if !state.has_attempts_left(&self.policy) {
                break;
            }

            let delay = self.policy.delay_for(fault, state.consecutive_errors);
            warn!(
                seed = spec.seed,
                attempt = state.attempt,
                fault = fault.as_str(),
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Submission failed, retrying"
            );
            metrics::counter!("flux_submission_retries_total").increment(1);
            self.clock.sleep(delay).await;
        }

        warn!(seed = spec.seed, attempts = state.attempt, "Submission retries exhausted");
        Err(SubmissionError::RetriesExhausted {
            attempts: state.attempt,
            last_error,
        })
    }

    /// Send one minimal job without retries to check reachability and the API key.
    ///
    /// Success and validation errors (400/422) both prove the key is accepted.
    pub async fn test_connection(&self) -> Result<(), SubmissionError> {
        let spec = JobSpec {
            prompt: "test".to_string(),
            input_image: PROBE_IMAGE.to_string(),
            seed: 1000,
            aspect_ratio: "1:1".to_string(),
            output_format: OutputFormat::Jpeg,
            quality: QualityOptions::default(),
        };

        let response = self.send(&spec).await.map_err(|err| SubmissionError::RetriesExhausted {
            attempts: 1,
            last_error: err.to_string(),
        })?;

        let code = response.status().as_u16();
        match code {
            401 | 403 => Err(SubmissionError::Rejected {
                code,
                message: "Access denied. Check API key.".to_string(),
            }),
            code if code >= 500 => Err(SubmissionError::RetriesExhausted {
                attempts: 1,
                last_error: format!("server error {code}"),
            }),
            200..=299 | 400 | 422 => {
                info!(status = code, "Connection test succeeded");
                Ok(())
            }
            _ => Err(SubmissionError::Rejected {
                code,
                message: format!("Unexpected status {code}"),
            }),
        }
    }

    async fn send(&self, spec: &JobSpec) -> Result<Response, reqwest::Error> {
        self.http
            .post(&self.endpoint)
            .header("x-key", &self.api_key)
            .json(spec)
            .send()
            .await
    }

    async fn accept(&self, response: Response, spec: JobSpec) -> Result<JobHandle, SubmissionError> {
        let status = response.status();

        if !status.is_success() {
            let code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| match code {
                401 | 403 => "Access denied. Check API key.".to_string(),
                _ => format!("API returned status {code}"),
            });
            warn!(seed = spec.seed, status = code, error = %message, "Submission rejected");
            return Err(SubmissionError::Rejected { code, message });
        }

        let accepted: AcceptedResponse = response
            .json()
            .await
            .map_err(|e| SubmissionError::MalformedResponse(format!("invalid JSON body: {e}")))?;

        let polling_url = accepted
            .polling_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| SubmissionError::MalformedResponse("no polling_url in response".to_string()))?;

        info!(
            seed = spec.seed,
            request_id = accepted.id.as_deref().unwrap_or("-"),
            "Generation job accepted"
        );

        Ok(JobHandle {
            polling_url,
            request_id: accepted.id,
            spec,
        })
    }
}

/// Pull a human-readable message out of an error body, if it has one.
fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error
        .or(parsed.detail)
        .map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .filter(|message| !message.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Invalid job spec: {0}")]
    InvalidSpec(#[from] garde::Report),

    #[error("Submission rejected with HTTP {code}: {message}")]
    Rejected { code: u16, message: String },

    #[error("Malformed acceptance response: {0}")]
    MalformedResponse(String),

    #[error("Submission failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl SubmissionError {
    /// Only exhausted retries point at a service-side condition worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}
