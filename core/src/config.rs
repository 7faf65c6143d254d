//! Tunable constants for fingerprinting, duplicate detection, ranking, and
//! bulk import.
//!
//! Every field has a default, so a config file only needs to list the values
//! it overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fingerprint: FingerprintConfig,
    pub similarity: SimilarityPolicy,
    pub import_dedup: ImportDedupPolicy,
    pub scoring: ScoringConfig,
    pub search: SearchConfig,
    pub import: ImportConfig,
}

impl EngineConfig {
    /// Load overrides from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Bucket widths for the macro fingerprint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub kcal_bucket: f64,
    pub macro_bucket: f64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            kcal_bucket: 5.0,
            macro_bucket: 1.0,
        }
    }
}

/// Thresholds for the name + nutrition similarity duplicate heuristic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityPolicy {
    pub name_jaccard_threshold: f64,
    pub nutrition_threshold: f64,
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        Self {
            name_jaccard_threshold: 0.8,
            nutrition_threshold: 0.9,
        }
    }
}

/// Macro tolerance window used by the bulk importer's duplicate check.
///
/// Kept separate from [`SimilarityPolicy`]; the two are tuned independently.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportDedupPolicy {
    pub kcal_tolerance: f64,
    pub macro_tolerance: f64,
}

impl Default for ImportDedupPolicy {
    fn default() -> Self {
        Self {
            kcal_tolerance: 5.0,
            macro_tolerance: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub brand_match: f64,
    pub bigram_match: f64,
    pub prefix_match: f64,
    pub all_tokens_match: f64,
    pub edit_distance_penalty: f64,
    pub edit_distance_cap: f64,
}

impl ScoringConfig {
    /// Highest score a candidate can reach; used to scale display confidence.
    #[must_use]
    pub fn max_score(&self) -> f64 {
        self.brand_match + self.bigram_match + self.prefix_match + self.all_tokens_match
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            brand_match: 3.0,
            bigram_match: 2.0,
            prefix_match: 1.5,
            all_tokens_match: 1.0,
            edit_distance_penalty: 0.5,
            edit_distance_cap: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub min_query_chars: usize,
    pub per_variant_limit: usize,
    pub result_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_query_chars: 2,
            per_variant_limit: 20,
            result_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub progress_every_batches: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            progress_every_batches: 10,
        }
    }
}
