//! Configuration for the comparison pipeline
//!
//! All tunables are grouped into sections mirroring how they are consumed:
//! document/page matching thresholds, page-matcher weights, font analysis,
//! rendering, artifact storage, and retry policy. Every field has a default
//! so `CompareConfig::default()` is a fully working configuration.

use crate::error::{CompareError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    pub comparison: ComparisonSettings,
    pub page_matcher: PageMatcherSettings,
    pub font: FontSettings,
    pub rendering: RenderingSettings,
    pub artifact: ArtifactSettings,
    pub retry: RetrySettings,
}

impl CompareConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| CompareError::StoreIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Job-level comparison settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonSettings {
    /// Wall-clock budget per job, in minutes
    pub max_processing_minutes: u64,
    /// Lower bound on the size of a detected sub-document
    pub min_pages_per_document: usize,
    /// Minimum combined similarity for two sub-documents to match
    pub text_threshold: f64,
    /// Minimum visual similarity considered a confident render match
    pub visual_threshold: f64,
    /// Number of evenly spaced page pairs sampled for visual similarity
    pub max_sample_pages: usize,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            max_processing_minutes: 15,
            min_pages_per_document: 1,
            text_threshold: 0.5,
            visual_threshold: 0.6,
            max_sample_pages: 3,
        }
    }
}

/// Page-matching thresholds and score weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageMatcherSettings {
    /// Pass 1 floor
    pub high_threshold: f64,
    /// Pass 2 floor
    pub medium_threshold: f64,
    /// Pass 3 floor
    pub low_threshold: f64,
    pub weights: MatchWeights,
}

impl Default for PageMatcherSettings {
    fn default() -> Self {
        Self {
            high_threshold: 0.95,
            medium_threshold: 0.85,
            low_threshold: 0.75,
            weights: MatchWeights::default(),
        }
    }
}

/// Weights of the page-similarity components
///
/// The content weights (text, structure, style, image) plus the positional
/// weight sum to 1.0; positional similarity is mixed in after the content
/// score so fingerprints stay position-independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub text: f64,
    pub structure: f64,
    pub style: f64,
    pub image: f64,
    pub positional: f64,
}

impl MatchWeights {
    /// Total weight carried by content components
    pub fn content_mass(&self) -> f64 {
        self.text + self.structure + self.style + self.image
    }
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            text: 0.35,
            structure: 0.25,
            style: 0.15,
            image: 0.15,
            positional: 0.10,
        }
    }
}

/// Font analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FontSettings {
    /// Compare per-font attributes beyond name equality
    pub detailed_analysis: bool,
    pub extraction_timeout_ms: u64,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            detailed_analysis: true,
            extraction_timeout_ms: 2000,
        }
    }
}

/// Settings forwarded to the external page renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingSettings {
    pub dpi: u32,
    pub fast_mode: bool,
    pub fast_mode_dpi: u32,
    /// Per-page render timeout
    pub timeout_seconds: u64,
}

impl RenderingSettings {
    /// DPI honoring fast mode
    pub fn effective_dpi(&self) -> u32 {
        if self.fast_mode {
            self.fast_mode_dpi
        } else {
            self.dpi
        }
    }
}

impl Default for RenderingSettings {
    fn default() -> Self {
        Self {
            dpi: 300,
            fast_mode: true,
            fast_mode_dpi: 150,
            timeout_seconds: 15,
        }
    }
}

/// Artifact store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// Base directory; artifacts land under `<root>/comparisons/<id>/`
    pub root: PathBuf,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("artifacts"),
        }
    }
}

/// Retry policy for transient per-page failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}
