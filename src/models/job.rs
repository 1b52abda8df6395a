use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output encoding requested from the generation service.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, EnumString, Display, PartialEq, Eq,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    /// File extension used when persisting an artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Quality-tuning knobs sent alongside the prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct QualityOptions {
    #[garde(skip)]
    pub prompt_upsampling: bool,

    /// 0 is the strictest moderation, 6 the most permissive.
    #[garde(range(min = 0, max = 6))]
    pub safety_tolerance: u8,
}

impl Default for QualityOptions {
    fn default() -> Self {
        Self {
            prompt_upsampling: false,
            safety_tolerance: 2,
        }
    }
}

/// One generation request. Serializes to the flat submission body.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct JobSpec {
    #[garde(length(min = 1))]
    pub prompt: String,

    /// Reference image as a `data:<mime>;base64,<payload>` URI.
    #[garde(prefix("data:"))]
    pub input_image: String,

    #[garde(skip)]
    pub seed: u64,

    #[garde(custom(validate_aspect_ratio))]
    pub aspect_ratio: String,

    #[garde(skip)]
    pub output_format: OutputFormat,

    #[serde(flatten)]
    #[garde(dive)]
    pub quality: QualityOptions,
}

pub(crate) fn validate_aspect_ratio(value: &str, _ctx: &()) -> garde::Result {
    let valid = value
        .split_once(':')
        .map(|(w, h)| {
            matches!(w.parse::<u32>(), Ok(w) if w > 0) && matches!(h.parse::<u32>(), Ok(h) if h > 0)
        })
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "aspect ratio must look like \"W:H\", got \"{value}\""
        )))
    }
}

/// Accepted job: where to poll, plus the spec that produced it.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub polling_url: String,
    pub request_id: Option<String>,
    pub spec: JobSpec,
}
