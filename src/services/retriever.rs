use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::status::CompletedJob;

/// Downloads the artifact a completed job points at.
pub struct ResultRetriever {
    http: Client,
    download_timeout: Duration,
}

impl ResultRetriever {
    pub fn new(http: Client, download_timeout: Duration) -> Self {
        Self {
            http,
            download_timeout,
        }
    }

    /// Fetch the image bytes. One attempt, no retries.
    ///
    /// Returns `None` when the job carries no sample URL or the download
    /// fails; the caller decides whether that is fatal.
    pub async fn retrieve(&self, job: &CompletedJob) -> Option<Vec<u8>> {
        let Some(url) = job.sample_url() else {
            warn!(
                request_id = job.request_id.as_deref().unwrap_or("-"),
                "Completed job has no sample URL"
            );
            return None;
        };

        let response = match self
            .http
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "Image download failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Image download returned error status");
            return None;
        }

        match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => {
                info!(size_bytes = bytes.len(), "Image downloaded");
                Some(bytes.to_vec())
            }
            Ok(_) => {
                warn!("Image download returned an empty body");
                None
            }
            Err(err) => {
                warn!(error = %err, "Failed to read image body");
                None
            }
        }
    }
}
