//! Settings, specs and payloads shared by the integration tests
#![allow(dead_code)]

use std::time::Duration;

use flux_batch::config::ClientSettings;
use flux_batch::models::job::{JobSpec, OutputFormat, QualityOptions};

/// Bytes served as the generated image.
pub const SAMPLE_IMAGE: &[u8] = b"\xFF\xD8\xFF\xE0fake-jpeg-payload";

/// Smallest valid reference image payload.
pub const INPUT_IMAGE: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRg==";

pub const API_KEY: &str = "test-key";

/// Production-shaped budgets. Tests run them on a manual clock, so the
/// delays cost nothing; only the HTTP timeouts are real.
pub fn settings() -> ClientSettings {
    ClientSettings {
        timeout: Duration::from_secs(5),
        max_retries: 5,
        retry_delay: Duration::from_secs(10),
        polling_interval: Duration::from_secs(5),
        polling_timeout_attempts: 180,
        max_consecutive_errors: 5,
        moderation_timeout: Duration::from_secs(300),
        moderation_max_attempts: 100,
        moderation_interval: Duration::from_secs(3),
        poll_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
    }
}

pub fn sample_spec() -> JobSpec {
    JobSpec {
        prompt: "Cinematic portrait of a woman, dramatic lighting".to_string(),
        input_image: INPUT_IMAGE.to_string(),
        seed: 1000,
        aspect_ratio: "2:3".to_string(),
        output_format: OutputFormat::Jpeg,
        quality: QualityOptions {
            prompt_upsampling: true,
            safety_tolerance: 3,
        },
    }
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("flux-batch-{label}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
