use serde::Deserialize;
use strum::EnumString;

use crate::services::retry::FaultKind;

/// Remote job status, normalized from the service's mixed-case vocabulary.
///
/// The service emits `Pending`, `processing`, `Ready`, `completed`, `failed`
/// and `Content Moderated`; anything else lands in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum JobStatus {
    #[strum(serialize = "pending")]
    Pending,
    #[strum(serialize = "processing")]
    Processing,
    #[strum(serialize = "ready", serialize = "completed")]
    Ready,
    #[strum(serialize = "failed")]
    Failed,
    #[strum(serialize = "content moderated")]
    ContentModerated,
    #[strum(default)]
    Unknown(String),
}

impl JobStatus {
    /// Single normalization point for raw status strings.
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        trimmed
            .parse()
            .unwrap_or_else(|_| Self::Unknown(trimmed.to_string()))
    }
}

/// Body of a status query.
#[derive(Debug, Clone, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub result: Option<JobResult>,
    /// Usually a string; some failures carry an object instead.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct JobResult {
    /// Signed URL of the generated image.
    #[serde(default)]
    pub sample: Option<String>,
}

/// Payload of a job the service reported as ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedJob {
    pub request_id: Option<String>,
    pub result: Option<JobResult>,
}

impl CompletedJob {
    /// The artifact reference nested under `result.sample`, if any.
    pub fn sample_url(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.sample.as_deref())
            .filter(|url| !url.is_empty())
    }
}

/// What a single status query observed.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Processing,
    ContentModerated,
    Completed(CompletedJob),
    Failed(String),
    Unrecognized(String),
    TransportError(FaultKind, String),
}

impl From<PollResponse> for PollOutcome {
    fn from(response: PollResponse) -> Self {
        match JobStatus::normalize(&response.status) {
            JobStatus::Pending => Self::Pending,
            JobStatus::Processing => Self::Processing,
            JobStatus::ContentModerated => Self::ContentModerated,
            JobStatus::Ready => Self::Completed(CompletedJob {
                request_id: response.id,
                result: response.result,
            }),
            JobStatus::Failed => Self::Failed(failure_reason(response.error)),
            JobStatus::Unknown(raw) => Self::Unrecognized(raw),
        }
    }
}

fn failure_reason(error: Option<serde_json::Value>) -> String {
    match error {
        Some(serde_json::Value::String(message)) if !message.is_empty() => message,
        Some(serde_json::Value::String(_) | serde_json::Value::Null) | None => "Unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}
