use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Contiguous block of seeds owned by one variation cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRange {
    pub start: u64,
    pub count: u32,
}

impl SeedRange {
    /// First seed after this range, or `None` past `u64::MAX`.
    pub fn checked_end(&self) -> Option<u64> {
        self.start.checked_add(u64::from(self.count))
    }

    /// First seed after this range, clamped at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(u64::from(self.count))
    }

    pub fn seeds(&self) -> impl Iterator<Item = u64> {
        self.start..self.end()
    }

    pub fn overlaps(&self, other: &SeedRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// One (style, aspect, quality) combination of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationCell {
    pub style: String,
    pub aspect: String,
    pub quality: String,
    pub seeds: SeedRange,
}

impl VariationCell {
    /// `style_aspect_quality`, the base of every file name in this cell.
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.style, self.aspect, self.quality)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub seed: u64,
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// `None` marks an attempt that produced no image.
pub type ImageSlots = Vec<Option<GeneratedImage>>;

/// Results keyed `style → aspect → quality`, one slot per requested image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariationResults(BTreeMap<String, BTreeMap<String, BTreeMap<String, ImageSlots>>>);

impl VariationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cell: &VariationCell, slots: ImageSlots) {
        self.0
            .entry(cell.style.clone())
            .or_default()
            .entry(cell.aspect.clone())
            .or_default()
            .insert(cell.quality.clone(), slots);
    }

    pub fn cell(&self, style: &str, aspect: &str, quality: &str) -> Option<&[Option<GeneratedImage>]> {
        self.0
            .get(style)?
            .get(aspect)?
            .get(quality)
            .map(Vec::as_slice)
    }

    /// Every cell's slots, in key order.
    pub fn cells(&self) -> impl Iterator<Item = (&str, &str, &str, &ImageSlots)> {
        self.0.iter().flat_map(|(style, aspects)| {
            aspects.iter().flat_map(move |(aspect, qualities)| {
                qualities
                    .iter()
                    .map(move |(quality, slots)| (style.as_str(), aspect.as_str(), quality.as_str(), slots))
            })
        })
    }

    pub fn statistics(&self) -> BatchStatistics {
        let mut stats = BatchStatistics::default();

        for (_, _, _, slots) in self.cells() {
            let successes = slots.iter().flatten().count();
            stats.total_variations += 1;
            stats.total_images += slots.len();
            stats.successful_images += successes;
            if successes > 0 {
                stats.successful_variations += 1;
            }
        }

        stats.success_rate_variations = ratio(stats.successful_variations, stats.total_variations);
        stats.success_rate_images = ratio(stats.successful_images, stats.total_images);
        stats
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total_variations: usize,
    /// Cells with at least one generated image.
    pub successful_variations: usize,
    pub total_images: usize,
    pub successful_images: usize,
    /// 0.0 to 1.0
    pub success_rate_variations: f64,
    pub success_rate_images: f64,
}

impl fmt::Display for BatchStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "variations {}/{} ({:.1}%), images {}/{} ({:.1}%)",
            self.successful_variations,
            self.total_variations,
            self.success_rate_variations * 100.0,
            self.successful_images,
            self.total_images,
            self.success_rate_images * 100.0,
        )
    }
}

/// Everything a batch run produced, as written to `all_variations_results.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: VariationResults,
    pub statistics: BatchStatistics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(style: &str, start: u64, count: u32) -> VariationCell {
        VariationCell {
            style: style.to_string(),
            aspect: "portrait".to_string(),
            quality: "standard".to_string(),
            seeds: SeedRange { start, count },
        }
    }

    fn image(seed: u64) -> Option<GeneratedImage> {
        Some(GeneratedImage {
            seed,
            size_bytes: 10,
            path: None,
        })
    }

    #[test]
    fn test_seed_range_overlap() {
        let a = SeedRange { start: 1000, count: 2 };
        let b = SeedRange { start: 1002, count: 2 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&SeedRange { start: 1001, count: 5 }));
        assert_eq!(b.seeds().collect::<Vec<_>>(), vec![1002, 1003]);
    }

    #[test]
    fn test_seed_range_end_near_max() {
        let last = SeedRange { start: u64::MAX - 1, count: 1 };
        assert_eq!(last.checked_end(), Some(u64::MAX));

        let past = SeedRange { start: u64::MAX - 1, count: 2 };
        assert_eq!(past.checked_end(), None);
        assert_eq!(past.end(), u64::MAX);
    }

    #[test]
    fn test_statistics_counts_partial_cells() {
        let mut results = VariationResults::new();
        results.insert(&cell("cinematic", 1000, 2), vec![image(1000), None]);
        results.insert(&cell("noir", 1002, 2), vec![None, None]);

        let stats = results.statistics();
        assert_eq!(stats.total_variations, 2);
        assert_eq!(stats.successful_variations, 1);
        assert_eq!(stats.total_images, 4);
        assert_eq!(stats.successful_images, 1);
        assert_eq!(stats.success_rate_variations, 0.5);
        assert_eq!(stats.success_rate_images, 0.25);
        assert_eq!(
            stats.to_string(),
            "variations 1/2 (50.0%), images 1/4 (25.0%)"
        );
    }

    #[test]
    fn test_empty_results_have_zero_rates() {
        let stats = VariationResults::new().statistics();
        assert_eq!(stats.total_images, 0);
        assert_eq!(stats.success_rate_images, 0.0);
    }

    #[test]
    fn test_serializes_nested_with_nulls() {
        let mut results = VariationResults::new();
        results.insert(&cell("noir", 7, 2), vec![image(7), None]);

        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["noir"]["portrait"]["standard"][0]["seed"], 7);
        assert!(json["noir"]["portrait"]["standard"][1].is_null());
        assert!(json["noir"]["portrait"]["standard"][0].get("path").is_none());
    }
}
