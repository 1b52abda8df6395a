//! Named styles, aspect ratios, quality presets and rotation angles that batch
//! requests refer to.
//!
//! The built-in catalog ships as `assets/catalog.json`; a replacement with the
//! same shape can be loaded from disk.

use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::job::{validate_aspect_ratio, QualityOptions};

const BUILTIN_CATALOG: &str = include_str!("../../assets/catalog.json");

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct StyleEntry {
    #[garde(length(min = 1))]
    pub key: String,
    #[garde(skip)]
    pub name: String,
    #[garde(length(min = 1))]
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct AspectEntry {
    #[garde(length(min = 1))]
    pub key: String,
    /// `W:H`, e.g. `"2:3"`
    #[garde(custom(validate_aspect_ratio))]
    pub ratio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct QualityEntry {
    #[garde(length(min = 1))]
    pub key: String,
    #[garde(skip)]
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    #[garde(dive)]
    pub options: QualityOptions,
}

/// Camera angle for rotation shots. The prompt keeps the character's
/// identity fixed while the viewpoint changes.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RotationEntry {
    #[garde(length(min = 1))]
    pub key: String,
    #[garde(skip)]
    pub name: String,
    #[garde(length(min = 1))]
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Catalog {
    #[garde(length(min = 1), dive)]
    pub styles: Vec<StyleEntry>,
    #[garde(length(min = 1), dive)]
    pub aspects: Vec<AspectEntry>,
    #[garde(length(min = 1), dive)]
    pub qualities: Vec<QualityEntry>,
    /// Optional in custom catalogs; rotation runs need it.
    #[serde(default)]
    #[garde(dive)]
    pub rotations: Vec<RotationEntry>,
}

impl Catalog {
    /// 13 styles, 5 aspect ratios, 5 quality presets, 12 rotation angles.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_str(raw)?;
        catalog.validate()?;

        check_unique("style", catalog.styles.iter().map(|s| s.key.as_str()))?;
        check_unique("aspect", catalog.aspects.iter().map(|a| a.key.as_str()))?;
        check_unique("quality", catalog.qualities.iter().map(|q| q.key.as_str()))?;
        check_unique("rotation", catalog.rotations.iter().map(|r| r.key.as_str()))?;

        Ok(catalog)
    }

    pub fn style(&self, key: &str) -> Option<&StyleEntry> {
        self.styles.iter().find(|s| s.key == key)
    }

    pub fn aspect(&self, key: &str) -> Option<&AspectEntry> {
        self.aspects.iter().find(|a| a.key == key)
    }

    pub fn quality(&self, key: &str) -> Option<&QualityEntry> {
        self.qualities.iter().find(|q| q.key == key)
    }

    pub fn rotation(&self, key: &str) -> Option<&RotationEntry> {
        self.rotations.iter().find(|r| r.key == key)
    }

    pub fn style_keys(&self) -> Vec<String> {
        self.styles.iter().map(|s| s.key.clone()).collect()
    }

    pub fn aspect_keys(&self) -> Vec<String> {
        self.aspects.iter().map(|a| a.key.clone()).collect()
    }

    pub fn quality_keys(&self) -> Vec<String> {
        self.qualities.iter().map(|q| q.key.clone()).collect()
    }

    pub fn rotation_keys(&self) -> Vec<String> {
        self.rotations.iter().map(|r| r.key.clone()).collect()
    }
}

fn check_unique<'a>(
    kind: &'static str,
    keys: impl Iterator<Item = &'a str>,
) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(CatalogError::DuplicateKey {
                kind,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Catalog failed validation: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Duplicate {kind} key in catalog: {key}")]
    DuplicateKey { kind: &'static str, key: String },
}
