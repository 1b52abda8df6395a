//! Variation matrix: every requested (style, aspect, quality) combination,
//! several seeds each, generated one after another.
//!
//! What a cell turns into is up to the [`SpecBuilder`]: catalog styles with
//! [`CatalogSpecBuilder`], a character turn-around with [`RotationSpecBuilder`].

use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::batch::{GeneratedImage, ImageSlots, MatrixReport, SeedRange, VariationCell, VariationResults};
use crate::models::catalog::{AspectEntry, Catalog, QualityEntry};
use crate::models::job::{JobSpec, OutputFormat};
use crate::models::rotation::RotationAngle;
use crate::services::generator::ImageGenerator;
use crate::services::image::{generate_filename, ImageStore};
use crate::services::retry::{Clock, TokioClock};

/// What to generate. Values are catalog keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixRequest {
    /// Outer dimension. Style keys, or rotation keys for a [`RotationSpecBuilder`].
    pub styles: Vec<String>,
    pub aspects: Vec<String>,
    pub qualities: Vec<String>,
    pub count_per_variation: u32,
    pub start_seed: u64,
}

impl MatrixRequest {
    /// Every style, aspect and quality in the catalog.
    pub fn all(catalog: &Catalog, count_per_variation: u32, start_seed: u64) -> Self {
        Self {
            styles: catalog.style_keys(),
            aspects: catalog.aspect_keys(),
            qualities: catalog.quality_keys(),
            count_per_variation,
            start_seed,
        }
    }

    /// One portrait shot per angle, consecutive seeds from `start_seed`.
    pub fn rotation(angles: &[RotationAngle], start_seed: u64) -> Self {
        Self {
            styles: angles.iter().map(RotationAngle::key).collect(),
            aspects: vec![ROTATION_ASPECT.to_string()],
            qualities: vec![ROTATION_QUALITY.to_string()],
            count_per_variation: 1,
            start_seed,
        }
    }

    /// Turn-around in `steps` angles (4 to 12).
    pub fn rotation_sequence(steps: usize, start_seed: u64) -> Result<Self, MatrixError> {
        let angles = RotationAngle::sequence(steps).ok_or(MatrixError::RotationSteps(steps))?;
        Ok(Self::rotation(&angles, start_seed))
    }

    /// `None` when the count does not fit in a `u64`.
    pub fn total_images(&self) -> Option<u64> {
        [self.styles.len(), self.aspects.len(), self.qualities.len()]
            .into_iter()
            .try_fold(u64::from(self.count_per_variation), |total, n| {
                total.checked_mul(u64::try_from(n).ok()?)
            })
    }
}

const ROTATION_ASPECT: &str = "portrait";
const ROTATION_QUALITY: &str = "high";

/// Fixed pauses inserted between requests to stay under the service's rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub between_attempts: Duration,
    pub between_cells: Duration,
    /// Used instead of `between_cells` when the next cell starts a new style.
    pub between_groups: Duration,
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            between_attempts: Duration::ZERO,
            between_cells: Duration::ZERO,
            between_groups: Duration::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            between_attempts: Duration::from_secs(2),
            between_cells: Duration::from_secs(2),
            between_groups: Duration::from_secs(5),
        }
    }
}

/// Turns a cell and seed into the spec for one attempt.
pub trait SpecBuilder {
    fn build(&self, cell: &VariationCell, seed: u64) -> Result<JobSpec, MatrixError>;

    /// Error for an outer-dimension key this builder cannot use.
    /// Defaults to catalog styles.
    fn unknown_style(&self, catalog: &Catalog, key: &str) -> Option<MatrixError> {
        catalog.style(key).is_none().then(|| MatrixError::UnknownStyle {
            value: key.to_string(),
            available: catalog.style_keys(),
        })
    }
}

impl<F> SpecBuilder for F
where
    F: Fn(&VariationCell, u64) -> JobSpec,
{
    fn build(&self, cell: &VariationCell, seed: u64) -> Result<JobSpec, MatrixError> {
        Ok(self(cell, seed))
    }
}

/// Builds specs from catalog entries around one shared reference image.
#[derive(Debug, Clone)]
pub struct CatalogSpecBuilder {
    catalog: Catalog,
    input_image: String,
    prompt_override: Option<String>,
    output_format: OutputFormat,
}

impl CatalogSpecBuilder {
    pub fn new(catalog: Catalog, input_image: String) -> Self {
        Self {
            catalog,
            input_image,
            prompt_override: None,
            output_format: OutputFormat::default(),
        }
    }

    /// Use `prompt` for every style instead of the catalog prompt.
    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt_override = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }
}

impl SpecBuilder for CatalogSpecBuilder {
    fn build(&self, cell: &VariationCell, seed: u64) -> Result<JobSpec, MatrixError> {
        let style = self
            .catalog
            .style(&cell.style)
            .ok_or_else(|| MatrixError::UnknownStyle {
                value: cell.style.clone(),
                available: self.catalog.style_keys(),
            })?;
        let (aspect, quality) = aspect_and_quality(&self.catalog, cell)?;

        Ok(JobSpec {
            prompt: self
                .prompt_override
                .clone()
                .unwrap_or_else(|| style.prompt.clone()),
            input_image: self.input_image.clone(),
            seed,
            aspect_ratio: aspect.ratio.clone(),
            output_format: self.output_format,
            quality: quality.options,
        })
    }
}

/// Builds character turn-around specs: the cell's style key names a
/// catalog rotation angle.
#[derive(Debug, Clone)]
pub struct RotationSpecBuilder {
    catalog: Catalog,
    input_image: String,
    base_prompt: Option<String>,
    output_format: OutputFormat,
}

impl RotationSpecBuilder {
    pub fn new(catalog: Catalog, input_image: String) -> Self {
        Self {
            catalog,
            input_image,
            base_prompt: None,
            output_format: OutputFormat::default(),
        }
    }

    /// Prefix every angle prompt with `prompt`, e.g. a description of the character.
    pub fn with_base_prompt(mut self, prompt: Option<String>) -> Self {
        self.base_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }
}

impl SpecBuilder for RotationSpecBuilder {
    fn build(&self, cell: &VariationCell, seed: u64) -> Result<JobSpec, MatrixError> {
        let rotation = self
            .catalog
            .rotation(&cell.style)
            .ok_or_else(|| MatrixError::UnknownRotation {
                value: cell.style.clone(),
                available: self.catalog.rotation_keys(),
            })?;
        let (aspect, quality) = aspect_and_quality(&self.catalog, cell)?;

        let prompt = match &self.base_prompt {
            Some(base) => format!("{base}, {}", rotation.prompt),
            None => rotation.prompt.clone(),
        };

        Ok(JobSpec {
            prompt,
            input_image: self.input_image.clone(),
            seed,
            aspect_ratio: aspect.ratio.clone(),
            output_format: self.output_format,
            quality: quality.options,
        })
    }

    fn unknown_style(&self, _catalog: &Catalog, key: &str) -> Option<MatrixError> {
        self.catalog.rotation(key).is_none().then(|| MatrixError::UnknownRotation {
            value: key.to_string(),
            available: self.catalog.rotation_keys(),
        })
    }
}

fn aspect_and_quality<'a>(
    catalog: &'a Catalog,
    cell: &VariationCell,
) -> Result<(&'a AspectEntry, &'a QualityEntry), MatrixError> {
    let aspect = catalog
        .aspect(&cell.aspect)
        .ok_or_else(|| MatrixError::UnknownAspect {
            value: cell.aspect.clone(),
            available: catalog.aspect_keys(),
        })?;
    let quality = catalog
        .quality(&cell.quality)
        .ok_or_else(|| MatrixError::UnknownQuality {
            value: cell.quality.clone(),
            available: catalog.quality_keys(),
        })?;
    Ok((aspect, quality))
}

/// Runs a [`MatrixRequest`] through an [`ImageGenerator`], recording every
/// attempt without letting one failure stop the batch.
pub struct VariationMatrix<G, B, C = TokioClock> {
    generator: G,
    builder: B,
    catalog: Catalog,
    clock: C,
    pacing: Pacing,
    store: Option<ImageStore>,
}

impl<G: ImageGenerator, B: SpecBuilder> VariationMatrix<G, B, TokioClock> {
    pub fn new(generator: G, builder: B, catalog: Catalog) -> Self {
        Self::with_clock(generator, builder, catalog, TokioClock)
    }
}

impl<G: ImageGenerator, B: SpecBuilder, C: Clock> VariationMatrix<G, B, C> {
    pub fn with_clock(generator: G, builder: B, catalog: Catalog, clock: C) -> Self {
        Self {
            generator,
            builder,
            catalog,
            clock,
            pacing: Pacing::default(),
            store: None,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Save each generated image into `store`.
    pub fn with_store(mut self, store: ImageStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the request and lay out its cells, styles outermost.
    ///
    /// Each cell takes the next `count_per_variation` seeds from a counter
    /// starting at `start_seed`. The whole block must fit below `u64::MAX`.
    pub fn plan(&self, request: &MatrixRequest) -> Result<Vec<VariationCell>, MatrixError> {
        if request.count_per_variation == 0 {
            return Err(MatrixError::ZeroCount);
        }
        check_dimension("styles", &request.styles, |key| {
            self.builder.unknown_style(&self.catalog, key)
        })?;
        check_dimension("aspects", &request.aspects, |key| {
            self.catalog.aspect(key).is_none().then(|| MatrixError::UnknownAspect {
                value: key.to_string(),
                available: self.catalog.aspect_keys(),
            })
        })?;
        check_dimension("qualities", &request.qualities, |key| {
            self.catalog.quality(key).is_none().then(|| MatrixError::UnknownQuality {
                value: key.to_string(),
                available: self.catalog.quality_keys(),
            })
        })?;

        request
            .total_images()
            .and_then(|total| request.start_seed.checked_add(total))
            .ok_or(MatrixError::SeedOverflow {
                start_seed: request.start_seed,
            })?;

        let mut next_seed = request.start_seed;
        let mut cells = Vec::with_capacity(request.styles.len() * request.aspects.len() * request.qualities.len());

        for style in &request.styles {
            for aspect in &request.aspects {
                for quality in &request.qualities {
                    let seeds = SeedRange {
                        start: next_seed,
                        count: request.count_per_variation,
                    };
                    next_seed = seeds.end();
                    cells.push(VariationCell {
                        style: style.clone(),
                        aspect: aspect.clone(),
                        quality: quality.clone(),
                        seeds,
                    });
                }
            }
        }

        Ok(cells)
    }

    /// Generate the whole matrix.
    ///
    /// Only request validation can fail; individual attempts that fail are
    /// recorded as empty slots.
    pub async fn run(&self, request: &MatrixRequest) -> Result<MatrixReport, MatrixError> {
        let cells = self.plan(request)?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(
            run_id = %run_id,
            variations = cells.len(),
            total_images = cells.len() as u64 * u64::from(request.count_per_variation),
            start_seed = request.start_seed,
            "Starting variation matrix"
        );

        let mut results = VariationResults::new();
        let mut previous_style: Option<&str> = None;

        for (index, cell) in cells.iter().enumerate() {
            match previous_style {
                Some(style) if style != cell.style => self.pause(self.pacing.between_groups).await,
                Some(_) => self.pause(self.pacing.between_cells).await,
                None => {}
            }
            previous_style = Some(cell.style.as_str());

            info!(
                run_id = %run_id,
                variation = index + 1,
                of = cells.len(),
                style = %cell.style,
                aspect = %cell.aspect,
                quality = %cell.quality,
                first_seed = cell.seeds.start,
                "Generating variation"
            );

            let slots = self.run_cell(cell).await;
            let generated = slots.iter().flatten().count();
            if generated == 0 {
                warn!(run_id = %run_id, cell = %cell.file_stem(), "No images generated for variation");
            }
            results.insert(cell, slots);
        }

        let statistics = results.statistics();
        info!(run_id = %run_id, statistics = %statistics, "Variation matrix complete");

        Ok(MatrixReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            results,
            statistics,
        })
    }

    async fn run_cell(&self, cell: &VariationCell) -> ImageSlots {
        let mut slots = Vec::with_capacity(cell.seeds.count as usize);

        for (n, seed) in cell.seeds.seeds().enumerate() {
            if n > 0 {
                self.pause(self.pacing.between_attempts).await;
            }
            slots.push(self.attempt(cell, seed).await);
        }

        slots
    }

    async fn attempt(&self, cell: &VariationCell, seed: u64) -> Option<GeneratedImage> {
        let spec = match self.builder.build(cell, seed) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(cell = %cell.file_stem(), seed, error = %err, "Could not build job spec");
                return None;
            }
        };
        let extension = spec.output_format.extension();

        let bytes = match self.generator.generate(spec).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    cell = %cell.file_stem(),
                    seed,
                    error = %err,
                    transient = err.is_transient(),
                    "Attempt failed"
                );
                return None;
            }
        };

        let path = match &self.store {
            Some(store) => {
                let name = generate_filename(&cell.file_stem(), 0, Some(seed), extension);
                match store.save(&name, &bytes).await {
                    Ok(path) => Some(path),
                    Err(err) => {
                        warn!(cell = %cell.file_stem(), seed, error = %err, "Could not save image");
                        return None;
                    }
                }
            }
            None => None,
        };

        Some(GeneratedImage {
            seed,
            size_bytes: bytes.len(),
            path,
        })
    }

    async fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            self.clock.sleep(delay).await;
        }
    }
}

/// Reject an empty dimension, repeated values, or any value `unknown` flags.
fn check_dimension(
    dimension: &'static str,
    values: &[String],
    unknown: impl Fn(&str) -> Option<MatrixError>,
) -> Result<(), MatrixError> {
    if values.is_empty() {
        return Err(MatrixError::EmptyDimension(dimension));
    }

    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value.as_str()) {
            return Err(MatrixError::DuplicateValue {
                dimension,
                value: value.clone(),
            });
        }
        if let Some(err) = unknown(value) {
            return Err(err);
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("Unknown style '{value}'. Available: {}", .available.join(", "))]
    UnknownStyle { value: String, available: Vec<String> },

    #[error("Unknown aspect '{value}'. Available: {}", .available.join(", "))]
    UnknownAspect { value: String, available: Vec<String> },

    #[error("Unknown quality '{value}'. Available: {}", .available.join(", "))]
    UnknownQuality { value: String, available: Vec<String> },

    #[error("Unknown rotation '{value}'. Available: {}", .available.join(", "))]
    UnknownRotation { value: String, available: Vec<String> },

    #[error("No {0} requested")]
    EmptyDimension(&'static str),

    #[error("'{value}' is listed more than once in {dimension}")]
    DuplicateValue { dimension: &'static str, value: String },

    #[error("count_per_variation must be at least 1")]
    ZeroCount,

    #[error("Seeds starting at {start_seed} run past the largest seed")]
    SeedOverflow { start_seed: u64 },

    #[error("Rotation sequences take 4 to 12 steps, got {0}")]
    RotationSteps(usize),
}
