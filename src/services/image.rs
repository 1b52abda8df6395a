use base64::Engine;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions tried when the configured input image is not found as named.
const ALTERNATE_EXTENSIONS: [&str; 3] = ["png", "jpeg", "webp"];

/// Read an image file and wrap it as a `data:<mime>;base64,<payload>` URI.
///
/// The MIME type comes from the file's magic bytes, then its extension,
/// and defaults to `image/jpeg`.
pub fn encode_data_uri(path: &Path) -> Result<String, ImageError> {
    let bytes = std::fs::read(path).map_err(|source| ImageError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mime = image::guess_format(&bytes)
        .or_else(|_| ImageFormat::from_path(path))
        .map(|format| format.to_mime_type())
        .unwrap_or("image/jpeg");

    debug!(path = %path.display(), mime, size_bytes = bytes.len(), "Encoded input image");
    Ok(format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&bytes)
    ))
}

/// `base_seed.ext` when a seed is given, `base_index.ext` for a positive
/// index, plain `base.ext` otherwise.
pub fn generate_filename(base: &str, index: u32, seed: Option<u64>, extension: &str) -> String {
    match seed {
        Some(seed) => format!("{base}_{seed}.{extension}"),
        None if index > 0 => format!("{base}_{index}.{extension}"),
        None => format!("{base}.{extension}"),
    }
}

/// Locate the input image in `dir`, trying the name as given and then the
/// same stem with `.png`, `.jpeg` and `.webp`.
pub fn find_input_image(dir: &Path, filename: &str) -> Result<PathBuf, ImageError> {
    let exact = dir.join(filename);
    if exact.is_file() {
        return Ok(exact);
    }

    ALTERNATE_EXTENSIONS
        .iter()
        .map(|ext| exact.with_extension(ext))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ImageError::NotFound {
            dir: dir.to_path_buf(),
            filename: filename.to_string(),
        })
}

/// Writes generated images under one output directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `bytes` as `name` inside the store, creating the directory if needed.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ImageError> {
        let path = self.dir.join(name);
        let write_err = |source| ImageError::Write {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(write_err)?;
        tokio::fs::write(&path, bytes).await.map_err(write_err)?;

        debug!(path = %path.display(), size_bytes = bytes.len(), "Saved image");
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Input image {filename} not found in {dir}")]
    NotFound { dir: PathBuf, filename: String },

    #[error("Failed to write image {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
